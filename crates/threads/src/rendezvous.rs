//! Ability-tiered matchmaking barrier.
//!
//! Players queue up in one of three ability tiers; when a tier's lobby
//! reaches the configured size, every player in it is assigned the same
//! match number and released together. Match numbers count up from 1
//! across all tiers in formation order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::alarm::Alarm;
use crate::condition::Condition;
use crate::lock::Lock;
use crate::scheduler::Scheduler;

pub const ABILITY_BEGINNER: u32 = 1;
pub const ABILITY_INTERMEDIATE: u32 = 2;
pub const ABILITY_EXPERT: u32 = 3;

const TIERS: usize = 3;

pub struct Rendezvous {
    lobby_size: usize,
    lock: Arc<Lock>,
    filled: [Condition; TIERS],
    state: Mutex<State>,
}

struct State {
    next_match: u32,
    lobbies: [Vec<u64>; TIERS],
    // thread id -> match number, filled in when a lobby completes
    assigned: HashMap<u64, u32>,
}

impl Rendezvous {
    pub fn new(lobby_size: usize, sched: Arc<Scheduler>, alarm: Arc<Alarm>) -> Self {
        assert!(lobby_size > 0, "lobby size must be positive");
        let lock = Arc::new(Lock::new(sched));
        let filled = [
            Condition::new(Arc::clone(&lock), Arc::clone(&alarm)),
            Condition::new(Arc::clone(&lock), Arc::clone(&alarm)),
            Condition::new(Arc::clone(&lock), Arc::clone(&alarm)),
        ];
        Self {
            lobby_size,
            lock,
            filled,
            state: Mutex::new(State {
                next_match: 1,
                lobbies: Default::default(),
                assigned: HashMap::new(),
            }),
        }
    }

    /// Enter the lobby for `ability` and block until it fills. Returns
    /// the match number shared by the whole lobby, or `None` for an
    /// ability outside the known tiers.
    pub fn play(&self, ability: u32) -> Option<u32> {
        if !(ABILITY_BEGINNER..=ABILITY_EXPERT).contains(&ability) {
            return None;
        }
        let tier = (ability - 1) as usize;

        self.lock.acquire();
        let me = self.lock.scheduler().current().id();

        let completes = {
            let mut st = self.state.lock().unwrap();
            st.lobbies[tier].push(me);
            st.lobbies[tier].len() == self.lobby_size
        };
        if completes {
            let mut st = self.state.lock().unwrap();
            let number = st.next_match;
            st.next_match += 1;
            let players = std::mem::take(&mut st.lobbies[tier]);
            log::debug!(
                "match {number} formed in tier {ability} with {} players",
                players.len()
            );
            for player in players {
                st.assigned.insert(player, number);
            }
            drop(st);
            self.filled[tier].wake_all();
        } else {
            while !self.state.lock().unwrap().assigned.contains_key(&me) {
                self.filled[tier].sleep();
            }
        }

        let number = self
            .state
            .lock()
            .unwrap()
            .assigned
            .remove(&me)
            .expect("completed lobby left no assignment");
        self.lock.release();
        Some(number)
    }
}
