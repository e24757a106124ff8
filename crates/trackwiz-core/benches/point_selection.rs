//! Benchmarks for point collection and view-model mapping.
//!
//! Both run on every click in an interactive front end.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use trackwiz_core::points::{PointKind, PointSet};
use trackwiz_core::service::{FrameListing, SessionId};
use trackwiz_core::view::{FrameViewport, WizardView};
use trackwiz_core::wizard::Wizard;

fn kind_for(i: u32) -> PointKind {
    if i % 3 == 0 {
        PointKind::Negative
    } else {
        PointKind::Positive
    }
}

fn filled_set(n: u32) -> PointSet {
    let mut set = PointSet::new();
    for i in 0..n {
        set.add(i * 7 % 1920, i * 13 % 1080, kind_for(i));
    }
    set
}

/// Split into wire coords/labels.
fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("points/selection");
    for &n in &[1u32, 10, 100] {
        let set = filled_set(n);
        group.throughput(Throughput::Elements(u64::from(n)));
        group.bench_with_input(BenchmarkId::new("selection", n), &set, |b, set| {
            b.iter(|| set.selection());
        });
    }
    group.finish();
}

/// Remove from the middle, the common "undo a misclick" path.
fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("points/remove");
    for &n in &[10u32, 100] {
        group.bench_with_input(BenchmarkId::new("middle", n), &n, |b, &n| {
            b.iter(|| {
                let mut set = PointSet::new();
                let ids: Vec<_> = (0..n).map(|i| set.add(i, i, kind_for(i))).collect();
                set.remove(ids[ids.len() / 2])
            });
        });
    }
    group.finish();
}

fn bench_view(c: &mut Criterion) {
    let mut wizard = Wizard::new();
    if wizard.session_created(SessionId::new("bench")).is_err() {
        return;
    }
    wizard.mark_job_started();
    if wizard.frames_ready(FrameListing::default()).is_err() {
        return;
    }
    for i in 0..20 {
        let _ = wizard.add_point(i * 10, i * 5, kind_for(i));
    }

    c.bench_function("view/from_wizard_20_points", |b| {
        b.iter(|| WizardView::from_wizard(&wizard));
    });

    let viewport = FrameViewport::fit(1920, 1080);
    c.bench_function("view/viewport_to_frame", |b| {
        b.iter(|| viewport.and_then(|v| v.to_frame(412.5, 233.0)));
    });
}

criterion_group!(benches, bench_selection, bench_remove, bench_view);
criterion_main!(benches);
