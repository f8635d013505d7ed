/// Construction parameters for a simulated machine. Nothing here is a
/// hard-coded constant, so tests can shrink the machine to a handful of
/// pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Size of one physical page / frame in bytes.
    pub page_size: usize,
    /// Number of physical frames backing the machine.
    pub num_phys_pages: usize,
    /// Ticks between consecutive timer interrupts.
    pub timer_period: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            page_size: 1024,
            num_phys_pages: 32,
            timer_period: 500,
        }
    }
}
