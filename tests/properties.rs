use pvr_hwpass::device::DeviceInfo;
use pvr_hwpass::hwsetup::{HwSetup, HwSubpass, Storage, create_renderpass_hwsetup};
use pvr_hwpass::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};
use pvr_hwpass::pixel_formats::PixelFormat;

/// Small deterministic generator so failures reproduce from the seed alone.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, bound: usize) -> usize {
        self.next() as usize % bound
    }

    fn chance(&mut self, one_in: usize) -> bool {
        self.below(one_in) == 0
    }
}

const FORMATS: [PixelFormat; 5] = [
    PixelFormat::R8UNorm,
    PixelFormat::R32Float,
    PixelFormat::RGBA8UNorm,
    PixelFormat::RGBA16Float,
    PixelFormat::RGBA32Float,
];

const LOAD_OPS: [LoadOp; 3] = [LoadOp::Load, LoadOp::Clear, LoadOp::DontCare];

const DEPTH_FORMATS: [PixelFormat; 2] = [PixelFormat::D32Float, PixelFormat::D16UNorm];

fn random_store(rng: &mut Lcg) -> StoreOp {
    if rng.chance(2) {
        StoreOp::Store
    } else {
        StoreOp::DontCare
    }
}

fn random_sample_count(rng: &mut Lcg) -> u32 {
    if rng.chance(3) { 4 } else { 1 }
}

/// A random pass with dependencies pointing backwards.
///
/// Colors come first, then up to two depth attachments.  Multisampled subpasses sometimes resolve
/// a color into a single-sampled attachment they don't otherwise touch.
fn random_pass(rng: &mut Lcg) -> RenderPass {
    let color_count = 2 + rng.below(5);
    let depth_count = rng.below(3);
    let attachment_count = color_count + depth_count;
    let mut attachments: Vec<Attachment> = (0..color_count)
        .map(|_| {
            Attachment::new(FORMATS[rng.below(FORMATS.len())])
                .with_load_op(LOAD_OPS[rng.below(LOAD_OPS.len())])
                .with_store_op(random_store(rng))
                .with_sample_count(random_sample_count(rng))
        })
        .collect();
    for _ in 0..depth_count {
        let depth = Attachment::new(DEPTH_FORMATS[rng.below(DEPTH_FORMATS.len())])
            .with_load_op(LOAD_OPS[rng.below(LOAD_OPS.len())])
            .with_store_op(random_store(rng))
            .with_sample_count(random_sample_count(rng));
        attachments.push(depth);
    }

    let subpass_count = 1 + rng.below(5);
    let subpasses = (0..subpass_count)
        .map(|index| {
            let sample_count = random_sample_count(rng);
            let mut subpass = Subpass::new(sample_count);
            let mut used = Vec::new();
            for _ in 0..1 + rng.below(3) {
                let color = rng.below(color_count);
                if used.contains(&color) || attachments[color].sample_count != sample_count {
                    continue;
                }
                used.push(color);
                let resolve = if sample_count > 1 && rng.chance(3) {
                    let dst = rng.below(color_count);
                    let free = attachments[dst].sample_count == 1 && !used.contains(&dst);
                    free.then_some(dst)
                } else {
                    None
                };
                subpass = match resolve {
                    Some(dst) => {
                        used.push(dst);
                        subpass.with_resolved_color(color, dst)
                    }
                    None => subpass.with_color(color),
                };
            }
            if depth_count > 0 && rng.chance(2) {
                let ds = color_count + rng.below(depth_count);
                if attachments[ds].sample_count == sample_count {
                    subpass = subpass.with_depth_stencil(ds);
                }
            }
            for _ in 0..rng.below(3) {
                let input = rng.below(attachment_count);
                if !used.contains(&input) {
                    used.push(input);
                    subpass = subpass.with_input(input);
                }
            }
            for dependency in 0..index {
                if rng.chance(2) {
                    subpass = if rng.chance(4) {
                        subpass.with_flushing_dependency(dependency)
                    } else {
                        subpass.with_dependency(dependency)
                    };
                }
            }
            subpass
        })
        .collect();

    RenderPass::new(attachments, subpasses, 4).expect("generated pass is valid")
}

fn position(setup: &HwSetup, subpass: usize) -> (usize, usize) {
    let mapping = setup.subpass_map[subpass];
    (mapping.render, mapping.subpass)
}

fn check_complete(pass: &RenderPass, setup: &HwSetup) {
    assert_eq!(setup.subpass_map.len(), pass.subpasses().len());
    let placed: usize = setup.renders.iter().map(|r| r.subpasses.len()).sum();
    assert_eq!(placed, pass.subpasses().len());
    for index in 0..pass.subpasses().len() {
        assert_eq!(setup.hw_subpass(index).unwrap().index, index);
    }
}

fn check_dependency_order(pass: &RenderPass, setup: &HwSetup) {
    for (index, subpass) in pass.subpasses().iter().enumerate() {
        for dependency in &subpass.dependencies {
            assert!(
                position(setup, dependency.subpass) < position(setup, index),
                "subpass {index} placed before its dependency {}",
                dependency.subpass
            );
            if dependency.flush {
                assert!(setup.subpass_map[dependency.subpass].render < setup.subpass_map[index].render);
            }
        }
    }
}

/// (buffer kind, buffer index, first dword, dword count)
fn dword_range(storage: Storage, bytes: u32) -> Option<(u8, u32, u32, u32)> {
    let dwords = bytes.div_ceil(4);
    match storage {
        Storage::Unallocated => None,
        Storage::OutputReg { output_reg, .. } => Some((0, 0, output_reg, dwords)),
        Storage::TileBuffer {
            tile_buffer,
            offset_dw,
        } => Some((1, tile_buffer, offset_dw, dwords)),
    }
}

fn check_no_overlap(subpass: &HwSubpass) {
    let ranges: Vec<_> = subpass
        .setup
        .resources
        .iter()
        .filter_map(|r| dword_range(r.storage, r.intermediate_size))
        .collect();
    for (i, a) in ranges.iter().enumerate() {
        for b in &ranges[i + 1..] {
            let disjoint = a.0 != b.0 || a.1 != b.1 || a.2 + a.3 <= b.2 || b.2 + b.3 <= a.2;
            assert!(disjoint, "subpass {} overlaps {a:?} and {b:?}", subpass.index);
        }
    }
}

/// Every color the pass writes and stores reaches memory.
fn check_stores(pass: &RenderPass, setup: &HwSetup) {
    for (index, attachment) in pass.attachments().iter().enumerate() {
        let written = pass.subpasses().iter().any(|s| s.colors().any(|c| c == index));
        if !written || attachment.store_op != StoreOp::Store {
            continue;
        }
        assert!(setup.surface_allocate[index]);
        let last_writer = setup
            .renders
            .iter()
            .rposition(|r| {
                r.subpasses.iter().any(|s| {
                    pass.subpasses()[s.index].colors().any(|c| c == index)
                })
            })
            .unwrap();
        assert!(
            setup.renders[last_writer]
                .eot_surfaces
                .iter()
                .any(|s| s.attachment == index && !s.need_resolve()),
            "attachment {index} not stored by render {last_writer}"
        );
    }
}

#[test]
fn random_passes_schedule_soundly() {
    let device = DeviceInfo::new();
    let mut rng = Lcg(0x5eed);
    let mut scheduled = 0;
    for seed in 0..300 {
        let pass = random_pass(&mut rng);
        let merged = match create_renderpass_hwsetup(&device, &pass, false) {
            Ok(setup) => setup,
            Err(err) => panic!("pass {seed} failed to schedule: {err}"),
        };
        check_complete(&pass, &merged);
        check_dependency_order(&pass, &merged);
        check_stores(&pass, &merged);
        merged
            .renders
            .iter()
            .flat_map(|r| &r.subpasses)
            .for_each(check_no_overlap);

        let again = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(merged, again, "pass {seed} scheduled differently twice");

        let split = create_renderpass_hwsetup(&device, &pass, true).unwrap();
        check_complete(&pass, &split);
        check_dependency_order(&pass, &split);
        check_stores(&pass, &split);
        assert_eq!(split.renders.len(), pass.subpasses().len());
        assert!(merged.renders.len() <= split.renders.len());
        for (index, &allocated) in merged.surface_allocate.iter().enumerate() {
            assert!(
                !allocated || split.surface_allocate[index],
                "pass {seed}: attachment {index} reaches memory only when merged"
            );
        }
        scheduled += 1;
    }
    assert_eq!(scheduled, 300);
}

#[test]
fn chain_of_readers_stays_in_one_render() {
    let device = DeviceInfo::new();
    let count = 4;
    let attachments = (0..count)
        .map(|i| {
            let store = if i == count - 1 {
                StoreOp::Store
            } else {
                StoreOp::DontCare
            };
            Attachment::new(PixelFormat::RGBA8UNorm)
                .with_load_op(LoadOp::Clear)
                .with_store_op(store)
        })
        .collect();
    let subpasses = (0..count)
        .map(|i| {
            let subpass = Subpass::new(1).with_color(i);
            if i == 0 {
                subpass
            } else {
                subpass.with_input(i - 1).with_dependency(i - 1)
            }
        })
        .collect();
    let pass = RenderPass::new(attachments, subpasses, 0).unwrap();
    let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();

    assert_eq!(setup.renders.len(), 1);
    check_dependency_order(&pass, &setup);
    setup.renders[0].subpasses.iter().for_each(check_no_overlap);
    // only the last color is written out
    assert_eq!(setup.surface_allocate, vec![false, false, false, true]);
    // two colors alternate between two registers
    let render = &setup.renders[0];
    assert_eq!(render.output_regs_count, 2);
    // later colors reuse a register, so they clear in their own subpass
    assert_eq!(render.color_init.len(), 2);
    assert_eq!(render.subpasses[0].color_init_ops, vec![LoadOp::DontCare]);
    assert_eq!(render.subpasses[2].color_init_ops, vec![LoadOp::Clear]);
    assert_eq!(render.subpasses[3].color_init_ops, vec![LoadOp::Clear]);
}
