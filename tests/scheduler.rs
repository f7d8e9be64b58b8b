use procscore::audio_api::{Automation, Param, SignalBackend};
use procscore::pipeline::EngineConfig;
use procscore::pipeline::song::LEAD_MELODY;
use procscore::pipeline::test_fixture::Rig;
use procscore::shared::{BeatTag, TICKS_PER_BAR, Track};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PULSE: f64 = 0.025;

fn rig(track: Track) -> Rig {
    let cfg = EngineConfig { seed: Some(17), initial_track: track, ..EngineConfig::default() };
    Rig::new(cfg).unwrap()
}

#[test]
fn chorus_lead_plays_the_melody_and_rests() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    let note = rig.player.snapshot().transport.note_length();
    let first = 0.05; // start delay
    let bar_len = note * TICKS_PER_BAR as f64;
    rig.run_for(21.0 * bar_len + 0.5, PULSE);

    let mut lead_ticks: Vec<usize> = rig
        .beats()
        .iter()
        .filter(|b| b.tag == BeatTag::Lead)
        .map(|b| ((b.time - first) / note).round() as usize)
        .filter(|step| step / 16 == 20)
        .map(|step| step % 16)
        .collect();
    lead_ticks.sort_unstable();
    let expected: Vec<usize> = (0..16).filter(|&t| LEAD_MELODY[t].is_some()).collect();
    assert_eq!(lead_ticks, expected);
}

#[test]
fn kicks_a_tenth_apart_never_stack_duck_ramps() {
    let cfg = EngineConfig {
        seed: Some(1),
        initial_track: Track::MainTheme,
        main_theme: procscore::pipeline::project::TrackSettings { bpm: 600.0, level: 0.6 },
        ..EngineConfig::default()
    };
    let mut rig = Rig::new(cfg).unwrap();
    rig.player.start();
    rig.run_for(0.3, PULSE);

    let kicks: Vec<f64> = rig.beats().iter().filter(|b| b.tag == BeatTag::Kick).map(|b| b.time).collect();
    assert!(kicks.len() >= 2);
    assert!((kicks[1] - kicks[0] - 0.1).abs() < 1e-9);

    rig.player.with_engine(|e| {
        let sidechain = e.mix_bus().unwrap().sidechain();
        let events = e.backend().timeline(sidechain, Param::Gain).unwrap().events().to_vec();
        let drops: Vec<f64> = events
            .iter()
            .filter_map(|ev| match *ev {
                Automation::SetValue { value, time } if (value - 0.25).abs() < 1e-12 => Some(time),
                _ => None,
            })
            .collect();
        assert_eq!(drops, kicks);

        // only the newest kick's recovery survives
        let ramps: Vec<f64> = events
            .iter()
            .filter_map(|ev| match *ev {
                Automation::ExponentialRamp { time, .. } => Some(time),
                _ => None,
            })
            .collect();
        let last = kicks[kicks.len() - 1];
        assert_eq!(ramps.len(), 1);
        assert!((ramps[0] - (last + 0.15)).abs() < 1e-9);
    });
}

#[test]
fn switching_to_the_current_track_changes_nothing() {
    let mut rig = rig(Track::Ambient);
    rig.player.start();
    rig.run_for(0.5, PULSE);
    let before = rig.player.snapshot();
    let master_events = |rig: &Rig| {
        rig.player.with_engine(|e| {
            let master = e.mix_bus().unwrap().master();
            e.backend().timeline(master, Param::Gain).unwrap().events().len()
        })
    };
    let events_before = master_events(&rig);

    assert!(!rig.player.switch_track(Track::Ambient));
    assert_eq!(rig.player.snapshot(), before);
    assert_eq!(master_events(&rig), events_before);
}

#[test]
fn restart_never_replays_the_past() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(2.0, PULSE);
    rig.player.stop();
    let last_before = rig.beats().iter().map(|b| b.time).fold(f64::MIN, f64::max);

    rig.player.with_engine(|e| e.backend_mut().advance(5.0));
    rig.clear_beats();
    rig.player.start();
    let now = rig.now();
    assert!(rig.player.snapshot().transport.next_event_time >= now);

    rig.run_for(1.0, PULSE);
    let beats = rig.beats();
    assert!(!beats.is_empty());
    assert!(beats.iter().all(|b| b.time >= now && b.time > last_before));
}

#[test]
fn quick_restart_keeps_scheduling_monotonic() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(1.0, PULSE);
    let scheduled_up_to = rig.player.snapshot().transport.next_event_time;
    rig.player.stop();
    rig.player.start();
    assert!(rig.player.snapshot().transport.next_event_time >= scheduled_up_to);
}

#[test]
fn pulses_after_stop_schedule_nothing() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(0.5, PULSE);
    rig.player.stop();
    let count = rig.beats().len();
    let nodes = rig.player.with_engine(|e| e.backend().nodes().count());
    rig.player.with_engine(|e| {
        for _ in 0..20 {
            e.backend_mut().advance(PULSE);
            e.on_timer_pulse();
        }
    });
    assert!(!rig.step(PULSE)); // pulse source is disarmed
    assert_eq!(rig.beats().len(), count);
    assert_eq!(rig.player.with_engine(|e| e.backend().nodes().count()), nodes);
}

#[test]
fn jittery_pulses_keep_the_invariants() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    let mut rng = StdRng::seed_from_u64(99);
    let mut last_time = f64::MIN;
    let mut last_position = (0u32, 0u8);
    for _ in 0..400 {
        rig.step(rng.gen_range(0.0..0.09));
        let snap = rig.player.snapshot();
        let t = snap.transport;
        assert!(t.tick < TICKS_PER_BAR);
        assert!(t.next_event_time >= snap.now - 0.1);
        assert!(t.next_event_time >= last_time);
        assert!((t.bar, t.tick) >= last_position);
        last_time = t.next_event_time;
        last_position = (t.bar, t.tick);
    }
    let beats = rig.beats();
    assert!(beats.windows(2).all(|w| w[0].time <= w[1].time + 0.02)); // fragments may be jittered late
}

#[test]
fn a_long_stall_skips_stale_ticks() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(0.5, PULSE);
    let nodes_before: Vec<_> = rig.player.with_engine(|e| e.backend().nodes().map(|(id, _)| *id).collect());

    rig.step(10.0);
    let now = rig.now();
    rig.player.with_engine(|e| {
        for (id, node) in e.backend().nodes() {
            if nodes_before.contains(id) {
                continue;
            }
            if let Some(start) = node.start {
                assert!(start >= now - 0.1, "voice started in the past at {start}");
            }
        }
    });
    let snap = rig.player.snapshot();
    assert!(snap.transport.next_event_time >= now - 0.1);
}

#[test]
fn muted_engine_still_reports_beats() {
    let mut rig = rig(Track::MainTheme);
    rig.player.set_enabled(false);
    rig.player.start();
    rig.run_for(1.0, PULSE);
    assert!(rig.beats().iter().any(|b| b.tag == BeatTag::Kick));
    rig.player.with_engine(|e| {
        assert_eq!(e.live_voices(), 0);
        assert_eq!(e.backend().nodes().count(), 5); // the bus only
    });
}

#[test]
fn failed_voice_builds_do_not_stop_the_music() {
    let mut rig = rig(Track::MainTheme);
    rig.player.with_engine(|e| e.backend_mut().reject_next_creates(6));
    rig.player.start();
    rig.run_for(1.0, PULSE);
    assert!(!rig.beats().is_empty());
    rig.player.with_engine(|e| {
        assert!(e.live_voices() > 0);
        assert!(e.is_playing());
    });
}

#[test]
fn locked_backend_defers_output_without_crashing() {
    let mut rig = rig(Track::Ambient);
    rig.player.with_engine(|e| e.backend_mut().set_resumable(false));
    assert!(rig.player.start());
    rig.run_for(0.5, PULSE);
    rig.player.with_engine(|e| {
        assert!(!e.backend().is_resumed());
        assert!(e.is_playing());
    });
    assert!(!rig.beats().is_empty());
}

#[test]
fn every_voice_is_released_exactly_once() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(6.0, PULSE);
    rig.player.with_engine(|e| {
        let released = e.backend().nodes().filter(|(_, n)| n.disconnects > 0).count();
        assert!(released > 0);
        assert!(e.backend().nodes().all(|(_, n)| n.disconnects <= 1));
        // nothing outlives its stop time by more than the tail and one pulse
        let now = e.backend().now();
        for (_, n) in e.backend().nodes() {
            if let Some(stop) = n.stop {
                if n.is_live() {
                    assert!(stop + 1.0 + 0.1 + PULSE > now, "voice stopped at {stop} still live at {now}");
                }
            }
        }
    });
}

#[test]
fn destroy_tears_everything_down_once() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(1.0, PULSE);
    rig.player.destroy_with_grace(std::time::Duration::ZERO);
    rig.player.destroy_with_grace(std::time::Duration::ZERO);
    assert!(!rig.trigger.is_armed());
    rig.player.with_engine(|e| {
        assert!(e.is_shut_down());
        assert_eq!(e.backend().live_nodes(), 0);
        assert!(e.backend().nodes().all(|(_, n)| n.disconnects == 1));
    });
}

#[test]
fn only_the_bus_feeds_the_master() {
    let mut rig = rig(Track::MainTheme);
    rig.player.start();
    rig.run_for(1.0, PULSE);
    assert!(rig.beats().iter().any(|b| b.tag == BeatTag::Kick));
    rig.player.with_engine(|e| {
        let master = procscore::audio_api::Endpoint::Node(e.mix_bus().unwrap().master());
        let feeding = e.backend().nodes().filter(|(_, n)| n.is_live() && n.outputs.contains(&master)).count();
        assert_eq!(feeding, 2); // sidechain and the reverb return
    });
}
