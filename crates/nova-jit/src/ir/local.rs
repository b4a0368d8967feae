use nova_types::Width;

/// Stack-allocated spill slot produced by register allocation when a value must be demoted.
#[derive(Debug, Clone, Copy)]
pub struct Local {
    pub width: Width,
    pub offset: u32,
}
