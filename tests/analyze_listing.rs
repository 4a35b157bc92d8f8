//! End-to-end pipeline tests over complete listings.

use warpcost::cost::report;
use warpcost::{analyze_listing, AnalyzeOptions};

const TWO_KERNELS: &str = "\
.entry reduce
{
mov $r1, g[$r2]
label1: add $r1, $r1, $r1
add $r1, $r1, $r1
@$p0.ne bra label1
mov g[$r2], $r1
return
}
.entry copy
{
mov $r1, g[$r2]
mov g[$r3], $r1
return
}
";

fn options(warps: u32) -> AnalyzeOptions {
    AnalyzeOptions {
        warps,
        ..Default::default()
    }
}

#[test]
fn analyzes_every_kernel_independently() {
    let opts = options(1);
    let (mut analyses, diags) = analyze_listing(TWO_KERNELS, &opts);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    assert_eq!(analyses.len(), 2);
    assert_eq!(analyses[0].name(), Some("reduce"));
    assert_eq!(analyses[1].name(), Some("copy"));

    let params = opts.cycle_params();

    // reduce: leading load flushes at max(4, 500); the ALU-only loop costs
    // 256 iterations * 3 ops * 4 cycles; the trailing store flushes at
    // max(4, 500); the return adds 4 at the final flush.
    let reduce = analyses[0].count_cycles(&params);
    assert_eq!(reduce.loops.len(), 1);
    assert_eq!(reduce.loops[0].cycles, 256 * 12);
    assert_eq!(reduce.total_cycles, 500 + 256 * 12 + 500 + 4);

    // copy: the load/store pair forms one burst (8 cycles of issue, still
    // under latency), then the return.
    let copy = analyses[1].count_cycles(&params);
    assert!(copy.loops.is_empty());
    assert_eq!(copy.total_cycles, 500 + 4);
}

#[test]
fn rerun_is_bit_identical() {
    let opts = options(4);
    let run = |src: &str| {
        let (mut analyses, _) = analyze_listing(src, &opts);
        let params = opts.cycle_params();
        analyses
            .iter_mut()
            .map(|a| {
                let cfg_dump = report::format_cfg(&a.cfg);
                let loop_ids: Vec<u32> = a.cfg.loops().iter().map(|l| l.id).collect();
                let summary = a.count_cycles(&params);
                (cfg_dump, loop_ids, summary.total_cycles, summary.stall_cycles)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(TWO_KERNELS), run(TWO_KERNELS));
}

#[test]
fn cycle_totals_grow_with_warp_count() {
    let mut prev = vec![0u64, 0u64];
    for warps in [1, 2, 8, 32] {
        let opts = options(warps);
        let (mut analyses, _) = analyze_listing(TWO_KERNELS, &opts);
        let params = opts.cycle_params();
        let totals: Vec<u64> = analyses
            .iter_mut()
            .map(|a| a.count_cycles(&params).total_cycles)
            .collect();
        for (t, p) in totals.iter().zip(&prev) {
            assert!(t >= p, "total decreased at warps={}", warps);
        }
        prev = totals;
    }
}

#[test]
fn unroll_factors_apply_to_loops() {
    let opts = AnalyzeOptions {
        warps: 1,
        unroll_factors: Some(vec![2]),
        ..Default::default()
    };
    let (mut analyses, diags) = analyze_listing(TWO_KERNELS, &opts);
    // The second kernel has no loops, so its factor table has the wrong
    // length only when loops exist; an empty loop list matches an empty
    // table requirement trivially by falling back with a warning.
    let reduce = analyses[0].count_cycles(&opts.cycle_params());
    assert_eq!(reduce.loops[0].cycles, 128 * 12);
    // The loop-free kernel warns about the table length and keeps going.
    assert_eq!(diags.len(), 1);
}

#[test]
fn inlined_calls_are_costed_at_the_call_site() {
    let src = "\
mov $r1, $r2
call label5
return
label5: add $r1, $r1, $r1
add $r1, $r1, $r1
return
";
    let opts = options(1);
    let (mut analyses, diags) = analyze_listing(src, &opts);
    assert!(diags.is_empty());
    // After inlining: mov, call, add, add, ret-back, ret. Every
    // instruction issues once: 6 * 4 cycles.
    let summary = analyses[0].count_cycles(&opts.cycle_params());
    assert_eq!(summary.total_cycles, 24);
}

#[test]
fn skipped_lines_warn_but_do_not_abort() {
    let src = "mov $r1, $r2\nfrobnicate $r4\nreturn\n";
    let (mut analyses, diags) = analyze_listing(src, &options(1));
    assert_eq!(diags.len(), 1);
    assert_eq!(analyses.len(), 1);
    let summary = analyses[0].count_cycles(&options(1).cycle_params());
    assert_eq!(summary.total_cycles, 8);
}
