use cpu_core::SegmentSelector;
use serde::{Deserialize, Serialize};

/// Selectors the hypervisor reserves in the guest GDT for its own code, data
/// and task state. Zero entries are unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperSelectors {
    pub cs: SegmentSelector,
    pub ds: SegmentSelector,
    pub cs64: SegmentSelector,
    pub tss: SegmentSelector,
    pub tss_trap08: SegmentSelector,
}

impl HyperSelectors {
    pub fn contains(&self, sel: SegmentSelector) -> bool {
        let sel = sel.with_rpl(0);
        [self.cs, self.ds, self.cs64, self.tss, self.tss_trap08]
            .iter()
            .any(|h| !h.is_null() && h.with_rpl(0) == sel)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelmConfig {
    pub hyper: Option<HyperSelectors>,
}
