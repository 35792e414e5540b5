//! Engine configuration: boolean behavior flags plus the handful of
//! numeric/enum settings that don't fit a bitset.

use bitflags::bitflags;

bitflags! {
    /// Behavior toggles, mirroring the source engine's `LangOptions`. All
    /// default to off except [`EngineOptions::CANCELLABLE`], matching a
    /// typical embedding's expectations (lenient by default, but stoppable).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EngineOptions: u32 {
        /// Undeclared-variable reads/writes raise an error instead of
        /// silently producing/creating `null`.
        const STRICT = 1 << 0;
        /// Disallow host-object construction/reflection paths considered
        /// unsafe for untrusted scripts (reflection into arbitrary classes).
        const SAFE = 1 << 1;
        /// Swallow evaluation errors that the source engine treats as
        /// recoverable (e.g. dividing by zero) and log them via `log::warn!`
        /// instead of propagating.
        const SILENT = 1 << 2;
        /// Check a shared cancellation flag at loop back-edges and call
        /// boundaries, aborting with `JexlError::Cancel`.
        const CANCELLABLE = 1 << 3;
        /// Attach `Position` to AST nodes and errors (also gated by the
        /// `debug` compile-time feature; both must be on for positions to
        /// be non-`NONE`).
        const DEBUG = 1 << 4;
        /// Block-scoped `var`: see [`crate::types::lexical::LexicalFrame`].
        const LEXICAL = 1 << 5;
        /// A shadowed outer variable is inaccessible (not just shadowed) for
        /// the remainder of the block that shadows it, even before the
        /// shadowing `var` executes (raises `LexicalShade` on early use).
        const LEXICAL_SHADE = 1 << 6;
        /// Captured lambda variables are immutable snapshots; writing to one
        /// from inside the lambda raises `ConstCapture`.
        const CONST_CAPTURE = 1 << 7;
        /// "Ant-ish" resolution: an undeclared dotted reference like `a.b.c`
        /// resolves by trying the longest-prefix variable name registered in
        /// the context (`"a.b.c"`, then `"a.b"`, then `"a"`) before treating
        /// `.b.c` as property access.
        const ANTISH = 1 << 8;
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::CANCELLABLE
    }
}

/// How `Script::get_variables`/`Engine::collect_variables` walk references:
/// mirrors the Commons JEXL `JexlEngine.Options` collector modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectMode {
    /// Only top-level reference roots (`a` in `a.b.c`).
    #[default]
    Roots,
    /// Every reference node, including property-access chains flattened to
    /// dotted strings (`a`, `a.b`, `a.b.c`).
    All,
    /// Like `All`, but also includes references inside lambda bodies that
    /// resolve to captured (not local) symbols.
    Captured,
}
