// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Chaining hardware renders onto GPU queues.

Each pipeline stage has its own timeline of sync points, incremented every time work on that stage
is submitted.  The render list from [`create_renderpass_hwsetup`](crate::hwsetup::create_renderpass_hwsetup)
is already in dependency order, so submitting it only needs each job to wait on the previous work
of the stages it touches.
*/

use smallvec::SmallVec;

use crate::error::{Error, try_push};
use crate::hwsetup::{HwRender, HwSetup, ResolveType};

/// A GPU queue stage with its own sync timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Geometry,
    Fragment,
    Compute,
    Transfer,
    OcclusionQuery,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Geometry,
        PipelineStage::Fragment,
        PipelineStage::Compute,
        PipelineStage::Transfer,
        PipelineStage::OcclusionQuery,
    ];

    const fn index(self) -> usize {
        match self {
            PipelineStage::Geometry => 0,
            PipelineStage::Fragment => 1,
            PipelineStage::Compute => 2,
            PipelineStage::Transfer => 3,
            PipelineStage::OcclusionQuery => 4,
        }
    }
}

/// A value on one stage's timeline.  Zero means nothing was submitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SyncPoint(u64);

impl SyncPoint {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

/// The latest sync point of every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSyncs {
    points: [SyncPoint; PipelineStage::ALL.len()],
}

impl StageSyncs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The point that work on `stage` last signalled.
    pub fn get(&self, stage: PipelineStage) -> SyncPoint {
        self.points[stage.index()]
    }

    /// Advances the timeline of `stage` for a new submission.
    pub fn signal(&mut self, stage: PipelineStage) -> SyncPoint {
        let point = &mut self.points[stage.index()];
        point.0 = point
            .0
            .checked_add(1)
            .expect("sync timeline overflowed");
        *point
    }
}

/// A point some phase must wait for before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wait {
    pub stage: PipelineStage,
    pub point: SyncPoint,
}

/// Points one phase waits on.  At most one per stage it depends on.
pub type Waits = SmallVec<[Wait; 3]>;

/// Waits for the last work of `stage`, when there was any.
fn wait_on(waits: &mut Waits, syncs: &StageSyncs, stage: PipelineStage) {
    let point = syncs.get(stage);
    if !point.is_initial() {
        waits.push(Wait { stage, point });
    }
}

/// Submission of one hardware render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    /// Index into [`HwSetup::renders`].
    pub render: usize,
    pub geometry_waits: Waits,
    pub geometry_signal: SyncPoint,
    pub fragment_waits: Waits,
    pub fragment_signal: SyncPoint,
    /// Set when some resolve of the render runs on the transfer engine after the fragment phase.
    pub transfer_signal: Option<SyncPoint>,
}

fn needs_transfer(render: &HwRender) -> bool {
    render
        .eot_surfaces
        .iter()
        .any(|surface| surface.resolve_type == Some(ResolveType::Transfer))
}

/// Plans one job per render in list order, advancing `syncs` past every job.
///
/// When `has_draws` is false, renders without side effects are skipped.
pub fn plan_render_jobs(
    setup: &HwSetup,
    syncs: &mut StageSyncs,
    has_draws: bool,
) -> Result<Vec<RenderJob>, Error> {
    let mut jobs = Vec::new();
    jobs.try_reserve(setup.renders.len())?;
    for (index, render) in setup.renders.iter().enumerate() {
        if !has_draws && !render.has_side_effects {
            logwise::trace_sync!("render {index} has nothing to do; skipped", index = index);
            continue;
        }

        let mut geometry_waits = Waits::new();
        wait_on(&mut geometry_waits, syncs, PipelineStage::Geometry);
        let geometry_signal = syncs.signal(PipelineStage::Geometry);

        let mut fragment_waits = Waits::new();
        fragment_waits.push(Wait {
            stage: PipelineStage::Geometry,
            point: geometry_signal,
        });
        // the previous render's end of tile writes what this one may load
        wait_on(&mut fragment_waits, syncs, PipelineStage::Fragment);
        // transfer resolves of an earlier render may still read memory this render overwrites
        wait_on(&mut fragment_waits, syncs, PipelineStage::Transfer);
        let fragment_signal = syncs.signal(PipelineStage::Fragment);

        let transfer_signal = needs_transfer(render).then(|| syncs.signal(PipelineStage::Transfer));

        try_push(
            &mut jobs,
            RenderJob {
                render: index,
                geometry_waits,
                geometry_signal,
                fragment_waits,
                fragment_signal,
                transfer_signal,
            },
        )?;
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::hwsetup::create_renderpass_hwsetup;
    use crate::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};
    use crate::pixel_formats::PixelFormat;

    #[test]
    fn timelines_are_independent() {
        let mut syncs = StageSyncs::new();
        assert!(syncs.get(PipelineStage::Compute).is_initial());
        assert_eq!(syncs.signal(PipelineStage::Compute).value(), 1);
        assert_eq!(syncs.signal(PipelineStage::Compute).value(), 2);
        assert_eq!(syncs.signal(PipelineStage::OcclusionQuery).value(), 1);
        assert!(syncs.get(PipelineStage::Geometry).is_initial());
    }

    fn two_render_setup() -> HwSetup {
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
                Attachment::new(PixelFormat::RGBA8UNorm),
            ],
            vec![Subpass::new(1).with_color(0), Subpass::new(1).with_color(1)],
            0,
        )
        .unwrap();
        create_renderpass_hwsetup(&DeviceInfo::new(), &pass, true).unwrap()
    }

    #[test]
    fn jobs_chain_in_list_order() {
        let setup = two_render_setup();
        let mut syncs = StageSyncs::new();
        let jobs = plan_render_jobs(&setup, &mut syncs, true).unwrap();
        assert_eq!(jobs.len(), 2);

        assert!(jobs[0].geometry_waits.is_empty());
        assert_eq!(
            jobs[1].geometry_waits.as_slice(),
            &[Wait {
                stage: PipelineStage::Geometry,
                point: jobs[0].geometry_signal
            }]
        );
        for job in &jobs {
            assert_eq!(job.fragment_waits[0].point, job.geometry_signal);
            assert_eq!(job.transfer_signal, None);
        }
        assert_eq!(jobs[0].fragment_waits.len(), 1);
        assert!(jobs[1].fragment_waits.contains(&Wait {
            stage: PipelineStage::Fragment,
            point: jobs[0].fragment_signal
        }));
        assert_eq!(syncs.get(PipelineStage::Fragment).value(), 2);
    }

    #[test]
    fn fragment_waits_for_the_store_it_loads() {
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
            ],
            vec![
                Subpass::new(1).with_color(0),
                Subpass::new(1).with_color(0).with_dependency(0),
            ],
            0,
        )
        .unwrap();
        let setup = create_renderpass_hwsetup(&DeviceInfo::new(), &pass, true).unwrap();
        assert_eq!(setup.renders[1].color_init[0].op, LoadOp::Load);

        let mut syncs = StageSyncs::new();
        let jobs = plan_render_jobs(&setup, &mut syncs, true).unwrap();
        assert_eq!(
            jobs[1].fragment_waits.as_slice(),
            &[
                Wait {
                    stage: PipelineStage::Geometry,
                    point: jobs[1].geometry_signal
                },
                Wait {
                    stage: PipelineStage::Fragment,
                    point: jobs[0].fragment_signal
                },
            ]
        );
    }

    #[test]
    fn side_effect_free_renders_are_skipped_without_draws() {
        let setup = two_render_setup();
        // the second render neither clears nor stores anything
        assert!(setup.renders[0].has_side_effects);
        assert!(!setup.renders[1].has_side_effects);

        let mut syncs = StageSyncs::new();
        let jobs = plan_render_jobs(&setup, &mut syncs, false).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].render, 0);
        assert_eq!(syncs.get(PipelineStage::Geometry).value(), 1);
    }

    #[test]
    fn transfer_resolve_signals_the_transfer_stage() {
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA32Float)
                    .with_load_op(LoadOp::Clear)
                    .with_sample_count(4),
                Attachment::new(PixelFormat::RGBA32Float),
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
            ],
            vec![
                Subpass::new(4).with_resolved_color(0, 1),
                Subpass::new(1).with_color(2),
            ],
            0,
        )
        .unwrap();
        let setup = create_renderpass_hwsetup(&DeviceInfo::new(), &pass, false).unwrap();
        let mut syncs = StageSyncs::new();
        let jobs = plan_render_jobs(&setup, &mut syncs, true).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].transfer_signal.map(|p| p.value()), Some(1));
        assert!(jobs[1].fragment_waits.contains(&Wait {
            stage: PipelineStage::Transfer,
            point: jobs[0].transfer_signal.unwrap()
        }));
    }
}
