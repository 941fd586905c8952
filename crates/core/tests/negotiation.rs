use reactive_visualiser_core::platform::{CandidateSpec, HeadlessPlatform};
use reactive_visualiser_core::signal::error_channel;
use reactive_visualiser_core::surface::{
    compare_candidates, ConfigDescriptor, Negotiation, SurfaceConfigNegotiator, SurfaceState,
    SurfaceStateCell,
};
use reactive_visualiser_core::AlertKind;

fn candidate(id: i32, rgb: (u32, u32, u32), native: bool, samples: u32) -> CandidateSpec {
    CandidateSpec {
        id,
        red: rgb.0,
        green: rgb.1,
        blue: rgb.2,
        buffer_size: rgb.0 + rgb.1 + rgb.2,
        native_renderable: native,
        sample_buffers: u32::from(samples > 0),
        samples,
        ..CandidateSpec::default()
    }
}

fn negotiate(
    candidates: Vec<CandidateSpec>,
) -> (Negotiation<HeadlessPlatform>, Vec<AlertKind>, SurfaceState) {
    let mut platform = HeadlessPlatform::new(candidates);
    let (signal, alerts) = error_channel();
    let state = SurfaceStateCell::new();
    let negotiation = SurfaceConfigNegotiator::default().negotiate(&mut platform, &state, &signal);
    let raised = std::iter::from_fn(|| alerts.try_take()).collect();
    (negotiation, raised, state.get())
}

fn selected_id(negotiation: &Negotiation<HeadlessPlatform>) -> i32 {
    match negotiation {
        Negotiation::Active(active) => active.config.config_id(),
        Negotiation::Unsupported { .. } => panic!("expected an active configuration"),
    }
}

#[test]
fn selection_always_uses_a_known_color_format() {
    let mut shapes = Vec::new();
    let formats = [(10, 10, 10), (8, 8, 8), (4, 4, 4), (5, 6, 5), (6, 6, 6)];
    for (i, rgb) in formats.into_iter().enumerate() {
        for native in [false, true] {
            shapes.push(candidate(i as i32 * 2 + i32::from(native), rgb, native, 0));
        }
    }

    // every rotation of the list still lands on an 888 or 565 candidate
    for start in 0..shapes.len() {
        let mut list = shapes.clone();
        list.rotate_left(start);
        let (negotiation, alerts, _) = negotiate(list);
        let Negotiation::Active(active) = negotiation else {
            panic!("expected an active configuration");
        };
        assert!(matches!(active.config.channel_bits(), (8, 8, 8) | (5, 6, 5)));
        assert!(alerts.is_empty());
    }
}

#[test]
fn unusable_lists_are_unsupported_with_exactly_one_alert() {
    let mut no_window = candidate(1, (8, 8, 8), true, 0);
    no_window.window = false;
    let odd_format = candidate(2, (6, 6, 6), true, 0);
    let mut dead = candidate(3, (5, 6, 5), true, 0);
    dead.fail_make_current = true;

    let (negotiation, alerts, state) = negotiate(vec![no_window, odd_format, dead]);
    assert!(!negotiation.is_active());
    assert_eq!(alerts, vec![AlertKind::Unsupported]);
    assert_eq!(state, SurfaceState::Unsupported);

    let (negotiation, alerts, _) = negotiate(Vec::new());
    assert!(!negotiation.is_active());
    assert_eq!(alerts.len(), 1);
}

#[test]
fn sample_count_breaks_ties() {
    let fewer = candidate(7, (8, 8, 8), true, 2);
    let more = candidate(3, (8, 8, 8), true, 4);
    assert!(compare_candidates(&fewer, &more).is_lt());

    let (negotiation, _, _) = negotiate(vec![more, fewer]);
    assert_eq!(selected_id(&negotiation), 7);
}

#[test]
fn native_outranks_everything_but_color_layout() {
    let a = candidate(1, (8, 8, 8), false, 0);
    let b = candidate(2, (5, 6, 5), true, 0);
    let c = candidate(3, (8, 8, 8), true, 2);

    // B and C are both native; B has no multisampling so it leads.
    let (negotiation, _, _) = negotiate(vec![a.clone(), b, c.clone()]);
    assert_eq!(selected_id(&negotiation), 2);

    // without B, native C still beats lighter non-native A
    let (negotiation, _, _) = negotiate(vec![a, c]);
    assert_eq!(selected_id(&negotiation), 3);
}

#[test]
fn activation_falls_through_to_the_next_candidate() {
    let mut best = candidate(1, (5, 6, 5), true, 0);
    best.fail_surface = true;
    let runner_up = candidate(2, (8, 8, 8), true, 0);

    let mut platform = HeadlessPlatform::new(vec![best, runner_up]);
    let (signal, _alerts) = error_channel();
    let state = SurfaceStateCell::new();
    let negotiation = SurfaceConfigNegotiator::default().negotiate(&mut platform, &state, &signal);

    assert_eq!(selected_id(&negotiation), 2);
    assert_eq!(platform.live_contexts(), 1);
    assert_eq!(platform.live_surfaces(), 1);
}
