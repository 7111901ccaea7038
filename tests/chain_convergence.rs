//! Integration tests for chain topology negotiation.
//!
//! These run whole simulated chains on real threads and check the octave
//! layout, bounds and Receiver role that the handshake converges on, plus
//! how a converged chain reacts to units clipped on or pulled off.

#![cfg(feature = "sim")]

use std::thread;
use std::time::{Duration, Instant};

use stacksynth::sim::{Chain, SimPresence};
use stacksynth::{Control, Role, UnitConfig};

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Polls `condition` until it holds or `timeout` passes.
fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_solo_unit_takes_the_reference_octave() {
    let chain = Chain::start(1, &UnitConfig::simulation());
    assert!(
        chain.wait_converged(CONVERGE_TIMEOUT),
        "a lone unit should converge on its first poll"
    );

    let state = chain.unit(0).state();
    assert_eq!(state.octave(), 4, "solo unit should sit on the reference octave");
    assert_eq!(state.lowest_octave(), 4);
    assert_eq!(state.highest_octave(), 4);
    assert_eq!(state.role(), Role::Receiver, "a chain of one is its own receiver");

    chain.shutdown();
}

#[test]
fn test_three_units_spread_around_the_reference_octave() {
    let chain = Chain::start(3, &UnitConfig::simulation());
    assert!(chain.wait_converged(CONVERGE_TIMEOUT), "chain of three should converge");

    let octaves: Vec<u8> = (0..3).map(|i| chain.unit(i).state().octave()).collect();
    assert_eq!(octaves, vec![3, 4, 5], "octaves should rise west to east");
    assert_eq!(
        chain.receiver_index(),
        Some(1),
        "the middle unit holds the reference octave and the Receiver role"
    );
    for i in 0..3 {
        let state = chain.unit(i).state();
        assert_eq!(state.lowest_octave(), 3, "unit {i} should know the west bound");
        assert_eq!(state.highest_octave(), 5, "unit {i} should know the east bound");
    }

    chain.shutdown();
}

#[test]
fn test_five_units_spread_two_octaves_each_side() {
    let chain = Chain::start(5, &UnitConfig::simulation());
    assert!(chain.wait_converged(CONVERGE_TIMEOUT), "chain of five should converge");

    let octaves: Vec<u8> = (0..5).map(|i| chain.unit(i).state().octave()).collect();
    assert_eq!(octaves, vec![2, 3, 4, 5, 6]);
    assert_eq!(chain.receiver_index(), Some(2));
    assert_eq!(chain.unit(0).state().lowest_octave(), 2);
    assert_eq!(chain.unit(4).state().highest_octave(), 6);

    chain.shutdown();
}

#[test]
fn test_attached_unit_adopts_the_next_octave_east() {
    let mut chain = Chain::start(3, &UnitConfig::simulation());
    assert!(chain.wait_converged(CONVERGE_TIMEOUT));

    // Give the chain a non-default volume so the newcomer has something
    // to pick up from the growth re-sync.
    let receiver = chain.receiver_index().expect("converged chain has a receiver");
    chain.unit(receiver).controls.turn(Control::Volume, 6);
    assert!(
        eventually(CONVERGE_TIMEOUT, || (0..3)
            .all(|i| chain.unit(i).state().volume() == 6)),
        "volume should reach every unit before the attach"
    );

    let index = chain.attach_east();
    assert_eq!(index, 3);
    assert!(
        chain.wait_converged(CONVERGE_TIMEOUT),
        "the attached unit should adopt an octave from the east bound broadcast"
    );

    let newcomer = chain.unit(index).state();
    assert_eq!(newcomer.octave(), 6, "newcomer extends the chain east of octave 5");
    assert_eq!(newcomer.volume(), 6, "newcomer should pick up the chain volume");
    assert_eq!(
        chain.receiver_index(),
        Some(1),
        "the Receiver role must not move on a hot attach"
    );
    for i in 0..4 {
        assert_eq!(
            chain.unit(i).state().highest_octave(),
            6,
            "unit {i} should learn the extended east bound"
        );
    }

    chain.shutdown();
}

#[test]
fn test_detached_east_unit_claims_its_own_receiver() {
    let mut chain = Chain::start(3, &UnitConfig::simulation());
    assert!(chain.wait_converged(CONVERGE_TIMEOUT));
    assert_eq!(chain.receiver_index(), Some(1));

    let detached = chain.detach_east().expect("a chain of three has an east end");
    assert!(
        eventually(CONVERGE_TIMEOUT, || detached.state().is_receiver()),
        "a unit cut off east of the receiver must claim the role for itself"
    );
    assert_eq!(detached.state().octave(), 5, "detaching does not move the octave");

    // The surviving chain keeps its receiver and shrinks the east bound.
    assert_eq!(chain.receiver_index(), Some(1));
    assert!(eventually(CONVERGE_TIMEOUT, || {
        chain.unit(0).state().highest_octave() == 4
            && chain.unit(1).state().highest_octave() == 4
    }));

    // The two fragments no longer share a bus: a key on the old chain
    // stays silent on the detached unit.
    chain.unit(0).keys.press(9);
    assert!(eventually(CONVERGE_TIMEOUT, || {
        chain
            .unit(1)
            .voices()
            .snapshot()
            .iter()
            .flatten()
            .count()
            == 1
    }));
    assert_eq!(
        detached.voices().snapshot().iter().flatten().count(),
        0,
        "the detached unit must not hear the old chain's key events"
    );
    chain.unit(0).keys.release(9);

    detached.shutdown();
    chain.shutdown();
}

#[test]
fn test_presence_blip_shorter_than_debounce_changes_nothing() {
    let mut config = UnitConfig::simulation();
    config.timing.connection_debounce = Duration::from_millis(40);

    let chain = Chain::start(2, &config);
    assert!(chain.wait_converged(CONVERGE_TIMEOUT));
    assert_eq!(chain.receiver_index(), Some(0));
    let octaves_before: Vec<u8> = (0..2).map(|i| chain.unit(i).state().octave()).collect();
    assert_eq!(octaves_before, vec![4, 5]);

    // Unclip and reclip inside the debounce window.
    chain.unit(0).presence.disconnect_east();
    chain.unit(1).presence.disconnect_west();
    thread::sleep(Duration::from_millis(10));
    SimPresence::connect(&chain.unit(0).presence, &chain.unit(1).presence);

    thread::sleep(Duration::from_millis(200));
    let octaves_after: Vec<u8> = (0..2).map(|i| chain.unit(i).state().octave()).collect();
    assert_eq!(octaves_after, octaves_before, "a glitch must not retopologize");
    assert_eq!(chain.receiver_index(), Some(0), "the Receiver role must not move");
    assert_eq!(chain.unit(0).state().highest_octave(), 5);
    assert_eq!(chain.unit(1).state().lowest_octave(), 4);

    chain.shutdown();
}
