// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns the arena in which the front ends allocate every AST node and
// string of one compilation, so syntax trees borrow from the session instead of carrying
// owned boxes. The session also collects SessionStats (types and methods compiled,
// instructions emitted, code size, the largest method) which the compiler adapter logs when
// a compilation finishes.

//! Arena-based compilation session management.
//!
//! All syntax tree nodes of a compilation are tied to the session lifetime.

use bumpalo::Bump;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for syntax trees.
    arena: &'arena Bump,

    /// Session statistics for debugging.
    stats: SessionStats,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self { arena, stats: SessionStats::default() }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate an object in the session arena.
    pub fn alloc<T>(&self, value: T) -> &'arena T {
        self.arena.alloc(value)
    }

    /// Copy a string into the session arena.
    pub fn alloc_str(&self, s: &str) -> &'arena str {
        self.arena.alloc_str(s)
    }

    /// Move a vector's contents into the arena.
    pub fn alloc_vec<T>(&self, items: Vec<T>) -> &'arena [T] {
        self.arena.alloc_slice_fill_iter(items)
    }

    pub fn record_type_compiled(&mut self) {
        self.stats.types_compiled += 1;
    }

    /// Record that a method body was emitted.
    pub fn record_method_compiled(&mut self, name: &str, code_size: usize, instructions: usize) {
        self.stats.methods_compiled += 1;
        self.stats.total_code_size += code_size;
        self.stats.instructions_emitted += instructions;

        if self.stats.largest_method_size < code_size {
            self.stats.largest_method_size = code_size;
            self.stats.largest_method_name = name.to_string();
        }
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub types_compiled: usize,
    pub methods_compiled: usize,
    pub instructions_emitted: usize,
    /// Total IL bytes emitted.
    pub total_code_size: usize,
    pub largest_method_size: usize,
    pub largest_method_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Types compiled: {}", self.types_compiled)?;
        writeln!(f, "  Methods compiled: {}", self.methods_compiled)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Total code size: {} bytes", self.total_code_size)?;

        if !self.largest_method_name.is_empty() {
            writeln!(
                f,
                "  Largest method: {} ({} bytes)",
                self.largest_method_name, self.largest_method_size
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let value = session.alloc(42);
        assert_eq!(*value, 42);

        let slice = session.alloc_vec(vec![1, 2, 3, 4]);
        assert_eq!(slice, &[1, 2, 3, 4]);
        assert_eq!(session.alloc_str("Main"), "Main");
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);

        session.record_type_compiled();
        session.record_method_compiled("Program::Main", 11, 3);
        session.record_method_compiled("Program::.ctor", 7, 3);

        let stats = session.stats();
        assert_eq!(stats.types_compiled, 1);
        assert_eq!(stats.methods_compiled, 2);
        assert_eq!(stats.instructions_emitted, 6);
        assert_eq!(stats.total_code_size, 18);

        let output = format!("{}", stats);
        assert!(output.contains("Methods compiled: 2"));
        assert!(output.contains("Program::Main (11 bytes)"));
    }
}
