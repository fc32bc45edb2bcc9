use std::collections::HashSet;

use acs_script::effect::SideEffect;
use acs_script::{ActorHandle, LineId, LineSide, Presentation, Replication, WorldModel};

/// Host for dry runs: prints what scripts say, logs everything else and keeps no world.
#[derive(Debug, Default)]
pub struct ConsoleHost {
    /// Tags reported busy for the whole run.
    pub busy_tags: HashSet<i32>,
    seed: u32,
    pub effects: usize,
}

impl ConsoleHost {
    pub fn new(seed: u32) -> Self {
        Self { seed, ..Self::default() }
    }
}

impl WorldModel for ConsoleHost {
    fn actor_alive(&self, _actor: ActorHandle) -> bool {
        false
    }

    fn sector_tag_busy(&self, tag: i32) -> bool {
        self.busy_tags.contains(&tag)
    }

    fn polyobj_busy(&self, _id: i32) -> bool {
        false
    }

    fn execute_special(
        &mut self,
        special: i32,
        args: [i32; 5],
        _activator: Option<ActorHandle>,
        line: Option<LineId>,
        side: LineSide,
    ) -> i32 {
        log::info!("special {} {:?} (line {:?}, {:?})", special, args, line, side);
        1
    }

    fn random(&mut self, min: i32, max: i32) -> i32 {
        // xorshift32; reproducible for a given --seed
        let mut x = self.seed.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        if max <= min {
            return min;
        }
        let span = (max as i64 - min as i64 + 1) as u64;
        (min as i64 + (x as u64 % span) as i64) as i32
    }
}

impl Presentation for ConsoleHost {
    fn print(&mut self, target: Option<ActorHandle>, text: &str, bold: bool) {
        match (target, bold) {
            (_, true) => println!("** {}", text),
            (Some(a), false) => println!("[{}:{}] {}", a.index, a.generation, text),
            (None, false) => println!("{}", text),
        }
    }
}

impl Replication for ConsoleHost {
    fn broadcast(&mut self, effect: &SideEffect) {
        self.effects += 1;
        log::debug!("effect {:?}", effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_stays_in_range_and_repeats_per_seed() {
        let mut a = ConsoleHost::new(7);
        let mut b = ConsoleHost::new(7);
        for _ in 0..100 {
            let v = a.random(-3, 3);
            assert!((-3..=3).contains(&v));
            assert_eq!(v, b.random(-3, 3));
        }
        assert_eq!(a.random(5, 5), 5);
    }
}
