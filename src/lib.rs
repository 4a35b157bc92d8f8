//! warpcost — static cycle estimation for warp-based GPU assembly.
//!
//! Pipeline: parse the listing into kernels, build each kernel's linked
//! instruction stream, inline calls, construct the CFG, detect natural
//! loops, and walk the graph to estimate execution cycles under a simple
//! latency-hiding warp model.

pub mod cfg;
pub mod cost;
pub mod diagnostic;
pub mod dot;
pub mod kernel;
pub mod span;
pub mod syntax;

use cfg::Cfg;
use cost::{CycleCounter, CycleParams, CycleSummary};
use diagnostic::Diagnostic;
use kernel::inline::inline_calls;
use kernel::Kernel;

/// Analysis options shared by every kernel of a listing.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Concurrent warps covering each other's memory latency.
    pub warps: u32,
    /// Experimental register-dependency mode.
    pub exp_mode: bool,
    /// Trip count assumed for loops without unroll information.
    pub default_trip_count: u32,
    /// Unroll factors indexed by loop id, for already-unrolled kernels.
    pub unroll_factors: Option<Vec<u32>>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            warps: 32,
            exp_mode: false,
            default_trip_count: 256,
            unroll_factors: None,
        }
    }
}

impl AnalyzeOptions {
    pub fn cycle_params(&self) -> CycleParams {
        CycleParams {
            warps: self.warps,
            exp_mode: self.exp_mode,
            ..CycleParams::default()
        }
    }
}

/// One analyzed kernel: its inlined instruction stream and CFG.
pub struct KernelAnalysis {
    pub kernel: Kernel,
    pub cfg: Cfg,
}

impl KernelAnalysis {
    pub fn name(&self) -> Option<&str> {
        self.kernel.name.as_deref()
    }

    /// Run the cycle walk. Per-instruction stamps land in the stream.
    pub fn count_cycles(&mut self, params: &CycleParams) -> CycleSummary {
        CycleCounter::new(&self.cfg, &mut self.kernel.stream, params.clone()).count()
    }
}

/// Parse and analyze every kernel of a listing. Diagnostics are warnings
/// about skipped lines or unusable unroll tables; analysis proceeds.
pub fn analyze_listing(
    source: &str,
    options: &AnalyzeOptions,
) -> (Vec<KernelAnalysis>, Vec<Diagnostic>) {
    let (parsed, mut diagnostics) = syntax::parse_listing(source);
    let mut analyses = Vec::new();
    for pk in parsed {
        let mut kernel = Kernel::from_parsed(pk);
        inline_calls(&mut kernel);
        let mut cfg = Cfg::build(&kernel.stream);
        diagnostics.extend(cfg.detect_loops(
            options.default_trip_count,
            options.unroll_factors.as_deref(),
        ));
        analyses.push(KernelAnalysis { kernel, cfg });
    }
    (analyses, diagnostics)
}
