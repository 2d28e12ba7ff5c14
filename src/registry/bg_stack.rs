//! Background-sound LIFO stack
//!
//! Whenever a new background sound starts playing, any previously playing
//! background sound is paused; when the newer one finishes, the one below
//! it resumes. Sounds with overlap behavior `restart`/`ignore` are unique
//! per event, so a replay moves them back to the top instead of stacking a
//! duplicate.

use crate::metadata::OverlapBehavior;
use uuid::Uuid;

/// LIFO of live background sounds, top last
#[derive(Debug, Default)]
pub struct BgStack {
    stack: Vec<Uuid>,
}

impl BgStack {
    /// Push a background sound, returning the sound to pause if any
    pub fn push(&mut self, uuid: Uuid, overlap: OverlapBehavior) -> Option<Uuid> {
        let top = self.stack.last().copied();

        if matches!(overlap, OverlapBehavior::Restart | OverlapBehavior::Ignore)
            && self.stack.contains(&uuid)
        {
            // Unique per event: move it back to the top.
            let to_pause = top.filter(|t| *t != uuid);
            self.stack.retain(|u| *u != uuid);
            self.stack.push(uuid);
            return to_pause;
        }

        match top {
            None => {
                self.stack.push(uuid);
                None
            }
            Some(top) if top != uuid => {
                self.stack.push(uuid);
                Some(top)
            }
            Some(_) => None,
        }
    }

    /// Remove a sound, returning the uncovered top if the removed one held it
    ///
    /// The caller decides whether the uncovered sound may actually resume
    /// (it must still be referenced).
    pub fn remove(&mut self, uuid: Uuid) -> Option<Uuid> {
        let Some(index) = self.stack.iter().position(|u| *u == uuid) else {
            return None;
        };
        let was_top = index == self.stack.len() - 1;
        self.stack.remove(index);
        if was_top {
            self.stack.last().copied()
        } else {
            None
        }
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.stack.contains(&uuid)
    }

    pub fn top(&self) -> Option<Uuid> {
        self.stack.last().copied()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Stack contents bottom-first
    pub fn snapshot(&self) -> Vec<Uuid> {
        self.stack.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_push_pauses_the_first() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(stack.push(a, OverlapBehavior::Overlap), None);
        assert_eq!(stack.push(b, OverlapBehavior::Overlap), Some(a));
        assert_eq!(stack.snapshot(), vec![a, b]);
    }

    #[test]
    fn pushing_the_top_again_is_a_no_op() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Overlap);
        assert_eq!(stack.push(a, OverlapBehavior::Overlap), None);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn restart_moves_a_buried_sound_to_the_top() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Restart);
        stack.push(b, OverlapBehavior::Overlap);

        // Replaying `a` reorders instead of duplicating, pausing the old top.
        assert_eq!(stack.push(a, OverlapBehavior::Restart), Some(b));
        assert_eq!(stack.snapshot(), vec![b, a]);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn ignore_on_top_returns_nothing_to_pause() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Ignore);
        assert_eq!(stack.push(a, OverlapBehavior::Ignore), None);
        assert_eq!(stack.snapshot(), vec![a]);
    }

    #[test]
    fn removing_the_top_uncovers_the_one_below() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Overlap);
        stack.push(b, OverlapBehavior::Overlap);

        assert_eq!(stack.remove(b), Some(a));
        assert_eq!(stack.snapshot(), vec![a]);
    }

    #[test]
    fn removing_a_buried_sound_uncovers_nothing() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Overlap);
        stack.push(b, OverlapBehavior::Overlap);

        assert_eq!(stack.remove(a), None);
        assert_eq!(stack.snapshot(), vec![b]);
    }

    #[test]
    fn removing_the_last_sound_empties_the_stack() {
        let mut stack = BgStack::default();
        let a = Uuid::new_v4();
        stack.push(a, OverlapBehavior::Overlap);
        assert_eq!(stack.remove(a), None);
        assert!(stack.is_empty());
    }
}
