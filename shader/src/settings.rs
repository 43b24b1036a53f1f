//! Compiler policy knobs.

/// How aggressively control flow is reconstructed. The translator walks
/// down this ladder when a stage fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum CompileDepth {
    /// Every PC becomes its own single-instruction block.
    BruteForce = 0,
    /// Blocks are reconstructed but SSY/PBK stay as runtime stack ops.
    FlowStack = 1,
    /// Stacks are eliminated but no structured control flow is built.
    NoFlowStack = 2,
    /// Structurize, removing only backward gotos.
    DecompileBackwards = 3,
    /// Structurize, removing every goto.
    FullDecompile = 4,
}

impl CompileDepth {
    pub fn name(self) -> &'static str {
        match self {
            CompileDepth::BruteForce => "Brute Force Compile",
            CompileDepth::FlowStack => "Simple Flow Stack Mode",
            CompileDepth::NoFlowStack => "Remove Flow Stack",
            CompileDepth::DecompileBackwards => "Decompile Backward Jumps",
            CompileDepth::FullDecompile => "Full Decompilation",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompilerSettings {
    pub depth: CompileDepth,
    pub disable_else_derivation: bool,
}

impl Default for CompilerSettings {
    fn default() -> CompilerSettings {
        CompilerSettings {
            depth: CompileDepth::FullDecompile,
            disable_else_derivation: false,
        }
    }
}
