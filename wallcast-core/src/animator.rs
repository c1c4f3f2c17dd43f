//! Display-mode animation engine.
//!
//! The broadcaster ticks this at `TICKS_PER_SECOND`; each animation mode
//! derives a per-TV display-mode assignment at its own cadence so the control
//! channel is not spammed. The engine is pure state: publishing frames and
//! persisting modes is the caller's job, driven by the returned [`AnimatorStep`].

use std::collections::BTreeMap;

use crate::config::WallLayout;
use crate::models::{AnimationMode, DisplayMode, TvId};

/// Nominal animator tick rate of the broadcaster loop.
pub const TICKS_PER_SECOND: u64 = 10;

/// Seconds between settings-store writes while animating. Store writes can be
/// slow on flash storage, so animated frames only persist at this cadence.
const SECS_BETWEEN_STORE_WRITES: u64 = 2;

/// Seconds between republishes of the persisted modes when no animation runs.
const REPUBLISH_SECS: u64 = 2;

/// What the caller should do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimatorStep {
    /// No animation is running: republish the persisted per-TV modes so
    /// receivers converge even after packet loss. Nothing is written.
    RepublishPersisted,
    /// Apply an animation frame: publish `modes`, and persist them when
    /// `persist` is set.
    Apply {
        modes: BTreeMap<TvId, DisplayMode>,
        persist: bool,
    },
}

#[derive(Debug, Default)]
pub struct Animator {
    mode: Option<AnimationMode>,
    ticks: u64,
    ticks_at_last_persist: Option<u64>,
}

impl Animator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one tick. `mode` is the currently persisted animation mode
    /// (never a pseudo mode). Returns the action for this tick, or `None`
    /// when the animation has nothing new to say.
    pub fn tick(&mut self, mode: AnimationMode, layout: &WallLayout) -> Option<AnimatorStep> {
        if self.mode != Some(mode) {
            self.mode = Some(mode);
            self.ticks = 0;
            self.ticks_at_last_persist = None;
        } else {
            self.ticks += 1;
        }

        // Animation steps advance once per second; intermediate ticks idle.
        if !self.ticks.is_multiple_of(TICKS_PER_SECOND) {
            return None;
        }
        let step = self.ticks / TICKS_PER_SECOND;

        let modes = match mode {
            AnimationMode::None => {
                if step.is_multiple_of(REPUBLISH_SECS) {
                    return Some(AnimatorStep::RepublishPersisted);
                }
                return None;
            }
            AnimationMode::TileRepeat => Self::toggle_all(layout, step, DisplayMode::Repeat)?,
            AnimationMode::FullscreenTile => Self::toggle_all(layout, step, DisplayMode::Tile)?,
            AnimationMode::Left | AnimationMode::Right | AnimationMode::Up | AnimationMode::Down => {
                Self::sweep(layout, mode, step)
            }
            AnimationMode::Rain => Self::rain(layout, step),
            AnimationMode::Spiral => Self::spiral(layout, step)?,
            // Pseudo modes are resolved before they reach the engine; if one
            // slips through, treat it as its implied uniform assignment.
            AnimationMode::Tile | AnimationMode::Repeat => {
                let display_mode = mode.implied_display_mode()?;
                layout
                    .tv_ids()
                    .into_iter()
                    .map(|id| (id, display_mode))
                    .collect()
            }
        };

        let persist = match self.ticks_at_last_persist {
            None => true,
            Some(at) => self.ticks - at >= SECS_BETWEEN_STORE_WRITES * TICKS_PER_SECOND,
        };
        if persist {
            self.ticks_at_last_persist = Some(self.ticks);
        }
        Some(AnimatorStep::Apply { modes, persist })
    }

    /// All TVs toggled between the two modes every two seconds. `first` is the
    /// mode shown during the initial phase.
    fn toggle_all(
        layout: &WallLayout,
        step: u64,
        first: DisplayMode,
    ) -> Option<BTreeMap<TvId, DisplayMode>> {
        if !step.is_multiple_of(2) {
            return None;
        }
        let mode = if (step / 2).is_multiple_of(2) {
            first
        } else {
            first.toggled()
        };
        Some(layout.tv_ids().into_iter().map(|id| (id, mode)).collect())
    }

    /// Directional sweep. Step 0 resets every TV to tile mode; step k >= 1
    /// flips one column (or row) per step, reversing direction of the flip
    /// every full pass.
    fn sweep(layout: &WallLayout, mode: AnimationMode, step: u64) -> BTreeMap<TvId, DisplayMode> {
        if step == 0 {
            return layout
                .tv_ids()
                .into_iter()
                .map(|id| (id, DisplayMode::Tile))
                .collect();
        }
        let k = step - 1;

        let (buckets, count) = match mode {
            AnimationMode::Left | AnimationMode::Right => (&layout.columns, layout.columns.len()),
            _ => (&layout.rows, layout.rows.len()),
        };
        if count == 0 {
            return BTreeMap::new();
        }
        let index = match mode {
            // LEFT and UP sweep in reverse order.
            AnimationMode::Left | AnimationMode::Up => count - 1 - (k as usize % count),
            _ => k as usize % count,
        };
        let display_mode = if (k / count as u64).is_multiple_of(2) {
            DisplayMode::Repeat
        } else {
            DisplayMode::Tile
        };

        buckets[index]
            .iter()
            .map(|id| (id.clone(), display_mode))
            .collect()
    }

    /// One row/column intersection cell per step, cycling through every cell
    /// before the flip direction reverses.
    fn rain(layout: &WallLayout, step: u64) -> BTreeMap<TvId, DisplayMode> {
        if step == 0 {
            return layout
                .tv_ids()
                .into_iter()
                .map(|id| (id, DisplayMode::Tile))
                .collect();
        }
        let (rows, cols) = (layout.rows.len() as u64, layout.columns.len() as u64);
        if rows == 0 || cols == 0 {
            return BTreeMap::new();
        }
        let k = step - 1;
        let row = (k % rows) as usize;
        let col = ((k / cols) % cols) as usize;
        let display_mode = if (k / (rows * cols)).is_multiple_of(2) {
            DisplayMode::Repeat
        } else {
            DisplayMode::Tile
        };
        layout
            .tvs_in_intersection(row, col)
            .into_iter()
            .map(|id| (id, display_mode))
            .collect()
    }

    /// Clockwise spiral over the wall cells, one cell per step, with a one
    /// second pause at the end of each cycle.
    fn spiral(layout: &WallLayout, step: u64) -> Option<BTreeMap<TvId, DisplayMode>> {
        if step == 0 {
            return Some(
                layout
                    .tv_ids()
                    .into_iter()
                    .map(|id| (id, DisplayMode::Tile))
                    .collect(),
            );
        }
        let cells = spiral_order(layout.rows.len(), layout.columns.len());
        if cells.is_empty() {
            return Some(BTreeMap::new());
        }
        let cycle = cells.len() as u64 + 1;
        let k = step - 1;
        let index = k % cycle;
        if index == cells.len() as u64 {
            // Cycle-end pause.
            return None;
        }
        let (row, col) = cells[index as usize];
        let display_mode = if (k / cycle).is_multiple_of(2) {
            DisplayMode::Repeat
        } else {
            DisplayMode::Tile
        };
        Some(
            layout
                .tvs_in_intersection(row, col)
                .into_iter()
                .map(|id| (id, display_mode))
                .collect(),
        )
    }
}

/// Cell visit order for the spiral animation: perimeter clockwise from the
/// top-left, then inward ring by ring.
pub fn spiral_order(rows: usize, cols: usize) -> Vec<(usize, usize)> {
    let mut cells = Vec::with_capacity(rows * cols);
    if rows == 0 || cols == 0 {
        return cells;
    }
    let (mut top, mut bottom) = (0isize, rows as isize - 1);
    let (mut left, mut right) = (0isize, cols as isize - 1);
    while top <= bottom && left <= right {
        for c in left..=right {
            cells.push((top as usize, c as usize));
        }
        for r in (top + 1)..=bottom {
            cells.push((r as usize, right as usize));
        }
        if top < bottom {
            for c in (left..right).rev() {
                cells.push((bottom as usize, c as usize));
            }
        }
        if left < right {
            for r in ((top + 1)..bottom).rev() {
                cells.push((r as usize, left as usize));
            }
        }
        top += 1;
        bottom -= 1;
        left += 1;
        right -= 1;
    }
    cells
}

/// Infer a pseudo animation mode from the current display modes: if every TV
/// agrees, the matching pseudo mode; otherwise `None`.
pub fn infer_pseudo_mode(modes: &BTreeMap<TvId, DisplayMode>) -> AnimationMode {
    let mut iter = modes.values();
    let Some(first) = iter.next() else {
        return AnimationMode::None;
    };
    if iter.all(|m| m == first) {
        AnimationMode::pseudo_for(*first)
    } else {
        AnimationMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ReceiverConfig};

    fn grid(rows: usize, cols: usize) -> WallLayout {
        let mut receivers = BTreeMap::new();
        for r in 0..rows {
            for c in 0..cols {
                receivers.insert(
                    format!("tv-r{r}c{c}.local"),
                    ReceiverConfig {
                        x: c as i64 * 100,
                        y: r as i64 * 100,
                        width: 100,
                        height: 100,
                        audio: "hdmi".to_string(),
                        video: "hdmi".to_string(),
                        ..ReceiverConfig::default()
                    },
                );
            }
        }
        Config { receivers, ..Config::default() }.layout().expect("layout")
    }

    fn tv(r: usize, c: usize) -> TvId {
        TvId::new(format!("tv-r{r}c{c}.local"), 1)
    }

    /// Drive the animator to the given animation step and return its frame.
    fn frame_at_step(
        animator: &mut Animator,
        mode: AnimationMode,
        layout: &WallLayout,
        step: u64,
    ) -> Option<AnimatorStep> {
        let mut last = animator.tick(mode, layout);
        let target_ticks = step * TICKS_PER_SECOND;
        while animator.ticks < target_ticks {
            last = animator.tick(mode, layout);
        }
        last
    }

    #[test]
    fn mode_change_resets_the_step_counter() {
        let layout = grid(2, 2);
        let mut animator = Animator::new();
        frame_at_step(&mut animator, AnimationMode::Right, &layout, 3);
        assert_eq!(animator.ticks, 30);
        animator.tick(AnimationMode::Left, &layout);
        assert_eq!(animator.ticks, 0);
    }

    #[test]
    fn none_republishes_every_two_seconds() {
        let layout = grid(2, 2);
        let mut animator = Animator::new();
        assert_eq!(
            animator.tick(AnimationMode::None, &layout),
            Some(AnimatorStep::RepublishPersisted)
        );
        // Next 19 ticks stay quiet, tick 20 republishes again.
        for _ in 0..19 {
            assert_eq!(animator.tick(AnimationMode::None, &layout), None);
        }
        assert_eq!(
            animator.tick(AnimationMode::None, &layout),
            Some(AnimatorStep::RepublishPersisted)
        );
    }

    #[test]
    fn right_sweep_flips_one_column_per_step() {
        let layout = grid(2, 3);
        let mut animator = Animator::new();

        // Step 0: everything tiled.
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::Right, &layout, 0)
        else {
            panic!("expected frame at step 0");
        };
        assert_eq!(modes.len(), 6);
        assert!(modes.values().all(|m| *m == DisplayMode::Tile));

        // Steps 1..=3: columns 0, 1, 2 flip to repeat.
        for (step, col) in [(1u64, 0usize), (2, 1), (3, 2)] {
            let Some(AnimatorStep::Apply { modes, .. }) =
                frame_at_step(&mut animator, AnimationMode::Right, &layout, step)
            else {
                panic!("expected frame at step {step}");
            };
            let expected: Vec<TvId> = vec![tv(0, col), tv(1, col)];
            assert_eq!(modes.keys().cloned().collect::<Vec<_>>(), expected);
            assert!(modes.values().all(|m| *m == DisplayMode::Repeat), "step {step}");
        }

        // Second pass flips back to tile.
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::Right, &layout, 4)
        else {
            panic!("expected frame at step 4");
        };
        assert_eq!(modes.keys().cloned().collect::<Vec<_>>(), vec![tv(0, 0), tv(1, 0)]);
        assert!(modes.values().all(|m| *m == DisplayMode::Tile));
    }

    #[test]
    fn left_sweep_runs_in_reverse_column_order() {
        let layout = grid(2, 3);
        let mut animator = Animator::new();
        frame_at_step(&mut animator, AnimationMode::Left, &layout, 0);
        for (step, col) in [(1u64, 2usize), (2, 1), (3, 0)] {
            let Some(AnimatorStep::Apply { modes, .. }) =
                frame_at_step(&mut animator, AnimationMode::Left, &layout, step)
            else {
                panic!("expected frame at step {step}");
            };
            assert_eq!(
                modes.keys().cloned().collect::<Vec<_>>(),
                vec![tv(0, col), tv(1, col)],
                "step {step}"
            );
        }
    }

    #[test]
    fn down_sweep_walks_rows() {
        let layout = grid(3, 2);
        let mut animator = Animator::new();
        frame_at_step(&mut animator, AnimationMode::Down, &layout, 0);
        for (step, row) in [(1u64, 0usize), (2, 1), (3, 2)] {
            let Some(AnimatorStep::Apply { modes, .. }) =
                frame_at_step(&mut animator, AnimationMode::Down, &layout, step)
            else {
                panic!("expected frame at step {step}");
            };
            assert_eq!(
                modes.keys().cloned().collect::<Vec<_>>(),
                vec![tv(row, 0), tv(row, 1)],
                "step {step}"
            );
        }
    }

    #[test]
    fn tile_repeat_toggles_every_two_seconds() {
        let layout = grid(2, 2);
        let mut animator = Animator::new();

        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::TileRepeat, &layout, 0)
        else {
            panic!("expected frame at step 0");
        };
        assert!(modes.values().all(|m| *m == DisplayMode::Repeat));

        // Step 1 is quiet; step 2 toggles.
        assert_eq!(frame_at_step(&mut animator, AnimationMode::TileRepeat, &layout, 1), None);
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::TileRepeat, &layout, 2)
        else {
            panic!("expected frame at step 2");
        };
        assert!(modes.values().all(|m| *m == DisplayMode::Tile));
    }

    #[test]
    fn rain_visits_row_column_cells() {
        let layout = grid(2, 2);
        let mut animator = Animator::new();
        frame_at_step(&mut animator, AnimationMode::Rain, &layout, 0);

        // k = 0: row 0, col 0.
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::Rain, &layout, 1)
        else {
            panic!("expected frame");
        };
        assert_eq!(modes.keys().cloned().collect::<Vec<_>>(), vec![tv(0, 0)]);

        // k = 1: row 1, col 0.
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::Rain, &layout, 2)
        else {
            panic!("expected frame");
        };
        assert_eq!(modes.keys().cloned().collect::<Vec<_>>(), vec![tv(1, 0)]);

        // k = 2: row 0, col 1.
        let Some(AnimatorStep::Apply { modes, .. }) =
            frame_at_step(&mut animator, AnimationMode::Rain, &layout, 3)
        else {
            panic!("expected frame");
        };
        assert_eq!(modes.keys().cloned().collect::<Vec<_>>(), vec![tv(0, 1)]);
    }

    #[test]
    fn spiral_order_matches_the_clockwise_walk() {
        assert_eq!(
            spiral_order(3, 3),
            vec![
                (0, 0),
                (0, 1),
                (0, 2),
                (1, 2),
                (2, 2),
                (2, 1),
                (2, 0),
                (1, 0),
                (1, 1),
            ]
        );
        assert_eq!(spiral_order(2, 2), vec![(0, 0), (0, 1), (1, 1), (1, 0)]);
        assert_eq!(spiral_order(1, 4), vec![(0, 0), (0, 1), (0, 2), (0, 3)]);
        assert_eq!(spiral_order(0, 3), vec![]);
    }

    #[test]
    fn spiral_pauses_at_cycle_end() {
        let layout = grid(2, 2);
        let mut animator = Animator::new();
        frame_at_step(&mut animator, AnimationMode::Spiral, &layout, 0);
        for step in 1..=4u64 {
            assert!(
                frame_at_step(&mut animator, AnimationMode::Spiral, &layout, step).is_some(),
                "step {step} should emit a cell"
            );
        }
        // Step 5 is the cycle-end pause, step 6 starts the next cycle.
        assert_eq!(frame_at_step(&mut animator, AnimationMode::Spiral, &layout, 5), None);
        assert!(frame_at_step(&mut animator, AnimationMode::Spiral, &layout, 6).is_some());
    }

    #[test]
    fn store_writes_are_throttled() {
        let layout = grid(2, 3);
        let mut animator = Animator::new();

        let Some(AnimatorStep::Apply { persist, .. }) =
            frame_at_step(&mut animator, AnimationMode::Right, &layout, 0)
        else {
            panic!("expected frame");
        };
        assert!(persist, "first frame persists");

        let Some(AnimatorStep::Apply { persist, .. }) =
            frame_at_step(&mut animator, AnimationMode::Right, &layout, 1)
        else {
            panic!("expected frame");
        };
        assert!(!persist, "one second later is below the write cadence");

        let Some(AnimatorStep::Apply { persist, .. }) =
            frame_at_step(&mut animator, AnimationMode::Right, &layout, 2)
        else {
            panic!("expected frame");
        };
        assert!(persist, "two seconds later persists again");
    }

    #[test]
    fn pseudo_inference() {
        let mut modes = BTreeMap::new();
        assert_eq!(infer_pseudo_mode(&modes), AnimationMode::None);

        modes.insert(tv(0, 0), DisplayMode::Tile);
        modes.insert(tv(0, 1), DisplayMode::Tile);
        assert_eq!(infer_pseudo_mode(&modes), AnimationMode::Tile);

        modes.insert(tv(0, 1), DisplayMode::Repeat);
        assert_eq!(infer_pseudo_mode(&modes), AnimationMode::None);

        modes.insert(tv(0, 0), DisplayMode::Repeat);
        assert_eq!(infer_pseudo_mode(&modes), AnimationMode::Repeat);
    }
}
