mod common;

use std::sync::{Arc, Mutex};

use threads::{
    Rendezvous, ABILITY_BEGINNER, ABILITY_EXPERT, ABILITY_INTERMEDIATE,
};

type Slot = Arc<Mutex<Option<u32>>>;

fn player(
    sched: &Arc<threads::Scheduler>,
    game: &Arc<Rendezvous>,
    name: &str,
    ability: u32,
) -> (threads::KThread, Slot) {
    let slot: Slot = Arc::new(Mutex::new(None));
    let g = Arc::clone(game);
    let s = Arc::clone(&slot);
    let thread = sched.fork(name, move || {
        *s.lock().unwrap() = g.play(ability);
    });
    (thread, slot)
}

#[test]
fn a_full_lobby_shares_one_match_number() {
    let (_machine, sched, alarm) = common::boot(100);
    let game = Arc::new(Rendezvous::new(2, Arc::clone(&sched), alarm));

    let (t1, r1) = player(&sched, &game, "p1", ABILITY_EXPERT);
    let (t2, r2) = player(&sched, &game, "p2", ABILITY_EXPERT);
    sched.join(&t1);
    sched.join(&t2);

    assert_eq!(*r1.lock().unwrap(), Some(1));
    assert_eq!(*r2.lock().unwrap(), Some(1));
}

#[test]
fn tiers_fill_independently_and_numbers_are_global() {
    let (_machine, sched, alarm) = common::boot(100);
    let game = Arc::new(Rendezvous::new(2, Arc::clone(&sched), alarm));

    // three beginners: two form match 1, the odd one out stays parked
    let (b1, r1) = player(&sched, &game, "b1", ABILITY_BEGINNER);
    let (b2, r2) = player(&sched, &game, "b2", ABILITY_BEGINNER);
    let (b3, r3) = player(&sched, &game, "b3", ABILITY_BEGINNER);
    sched.join(&b1);
    sched.join(&b2);
    assert_eq!(*r1.lock().unwrap(), Some(1));
    assert_eq!(*r2.lock().unwrap(), Some(1));
    assert_eq!(*r3.lock().unwrap(), None);

    // an intermediate pair forms next and takes the next global number
    let (i1, q1) = player(&sched, &game, "i1", ABILITY_INTERMEDIATE);
    let (i2, q2) = player(&sched, &game, "i2", ABILITY_INTERMEDIATE);
    sched.join(&i1);
    sched.join(&i2);
    assert_eq!(*q1.lock().unwrap(), Some(2));
    assert_eq!(*q2.lock().unwrap(), Some(2));
    assert_eq!(*r3.lock().unwrap(), None);

    // a fourth beginner completes the waiting lobby
    let (b4, r4) = player(&sched, &game, "b4", ABILITY_BEGINNER);
    sched.join(&b4);
    sched.join(&b3);
    assert_eq!(*r3.lock().unwrap(), Some(3));
    assert_eq!(*r4.lock().unwrap(), Some(3));
}

#[test]
fn unknown_abilities_are_rejected_without_blocking() {
    let (_machine, sched, alarm) = common::boot(100);
    let game = Rendezvous::new(2, sched, alarm);

    assert_eq!(game.play(0), None);
    assert_eq!(game.play(4), None);
}

#[test]
fn a_lobby_of_one_never_waits() {
    let (_machine, sched, alarm) = common::boot(100);
    let game = Rendezvous::new(1, sched, alarm);

    assert_eq!(game.play(ABILITY_BEGINNER), Some(1));
    assert_eq!(game.play(ABILITY_EXPERT), Some(2));
}
