// src/verification/interval_engine.rs
//
// Reference reachability engine over a lane corridor.
//
// The ego reachable set is a union of cells (lane, s interval, v interval).
// One step:
//   1. propagate every cell with the longitudinal bounds (trapezoid in s)
//   2. keep cells on the same side of each obstacle they were on before
//   3. spawn lane-change cells once the minimum lane-change time has passed
//   4. drop lanes excluded by G clauses, subtract obstacle occupancies,
//      cap positions behind SafeDistance obstacles
//   5. on the last step, keep only cells satisfying every FG clause
//   6. merge overlapping cells per (lane, committed)

use super::prediction::{OccupancyStep, PredictedOccupancy};
use super::reach::{ReachCell, ReachRequest, ReachabilityEngine, ReachableSets};
use crate::geometry::Interval;
use crate::types::LaneletId;
use anyhow::{bail, Result};
use tracing::debug;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct IntervalReachEngine {
    /// Upper bound on cells per layer after merging
    pub max_cells: usize,
}

impl Default for IntervalReachEngine {
    fn default() -> Self {
        Self { max_cells: 512 }
    }
}

/// Steps needed to move one lane over with bang-bang lateral acceleration.
pub fn min_lane_change_steps(lane_width: f64, a_lat_max: f64, dt: f64) -> usize {
    (2.0 * (lane_width / a_lat_max).sqrt() / dt).ceil() as usize
}

/// Safe following distance behind a braking leader.
pub fn safe_distance(v_ego: f64, v_other: f64, a_ego: f64, a_other: f64, reaction_time: f64) -> f64 {
    let ego_stop = v_ego * v_ego / (2.0 * a_ego.abs().max(EPS));
    let other_stop = v_other * v_other / (2.0 * a_other.abs().max(EPS));
    (ego_stop - other_stop + v_ego * reaction_time).max(0.0)
}

struct StepContext<'r, 'a> {
    request: &'r ReachRequest<'a>,
    /// Lanes admitted by every G clause
    allowed: Vec<bool>,
    /// Lanes satisfying every FG lanelet clause; None without such clauses
    targets: Option<Vec<bool>>,
    change_steps: usize,
    margin: f64,
}

impl StepContext<'_, '_> {
    fn is_target(&self, lane: usize) -> bool {
        self.targets.as_ref().map_or(false, |t| t[lane])
    }

    /// Occupancies of `lane` at `step`.
    fn occupied<'s>(&'s self, lane: usize, step: usize) -> impl Iterator<Item = (&'s PredictedOccupancy, &'s OccupancyStep)> + 's {
        let corridor_lane = &self.request.corridor.lanes()[lane];
        let occupancies: &'s [PredictedOccupancy] = self.request.occupancies;
        occupancies.iter().filter_map(move |o| {
            let at = o.at(step)?;
            corridor_lane.touches(&at.lanelets).then_some((o, at))
        })
    }
}

impl ReachabilityEngine for IntervalReachEngine {
    fn compute_reachable_sets(&mut self, request: &ReachRequest<'_>) -> Result<ReachableSets> {
        let b = request.bounds;
        if !(request.dt > 0.0) {
            bail!("step size must be positive, got {}", request.dt);
        }
        if b.a_lon_min > b.a_lon_max || b.v_lon_min > b.v_lon_max {
            bail!(
                "inconsistent longitudinal bounds a=[{}, {}] v=[{}, {}]",
                b.a_lon_min,
                b.a_lon_max,
                b.v_lon_min,
                b.v_lon_max
            );
        }
        if request.corridor.lanes().is_empty() {
            bail!("corridor has no lanes");
        }

        let ctx = step_context(request);
        debug!(
            "Reach: {} lanes, lane change after {} steps, spec {}",
            request.corridor.lanes().len(),
            ctx.change_steps,
            request.specification
        );

        let initial = ReachCell {
            lane: 0,
            s: Interval::point(request.initial_s),
            v: Interval::point(request.initial_v),
            committed: ctx.is_target(0),
            dwell: 0,
        };
        let mut sets = ReachableSets::default();
        let layer0 = finish_layer(&ctx, vec![initial], 0);
        let mut empty = layer0.is_empty();
        sets.push(layer0);

        for k in 0..request.horizon {
            if empty {
                debug!("Reach: layer {} is empty, stopping", k);
                break;
            }
            let previous = sets.layer(k).unwrap_or_default();
            let mut next = Vec::new();
            for cell in previous {
                let Some(moved) = propagate(&ctx, cell, k) else {
                    continue;
                };
                if moved.dwell >= ctx.change_steps && !moved.committed {
                    next.extend(lane_changes(&ctx, &moved));
                }
                next.push(moved);
            }

            let layer = finish_layer(&ctx, next, k + 1);
            if layer.len() > self.max_cells {
                bail!("layer {} holds {} cells (limit {})", k + 1, layer.len(), self.max_cells);
            }
            empty = layer.is_empty();
            sets.push(layer);
        }

        Ok(sets)
    }
}

fn step_context<'r, 'a>(request: &'r ReachRequest<'a>) -> StepContext<'r, 'a> {
    let lanes = request.corridor.lanes();
    let spec = request.specification;

    let allowed = lanes
        .iter()
        .map(|lane| spec.always_in().all(|ids| lane.touches(ids)))
        .collect();

    let eventually: Vec<&[LaneletId]> = spec.eventually_in().collect();
    let targets = (!eventually.is_empty()).then(|| {
        lanes
            .iter()
            .map(|lane| eventually.iter().all(|ids| lane.touches(ids)))
            .collect()
    });

    StepContext {
        request,
        allowed,
        targets,
        change_steps: min_lane_change_steps(request.lane_width, request.bounds.a_lat_max, request.dt),
        margin: request.ego_length * 0.5,
    }
}

/// Longitudinal step plus the "no overtaking through an obstacle" cut.
fn propagate(ctx: &StepContext<'_, '_>, cell: &ReachCell, k: usize) -> Option<ReachCell> {
    let b = ctx.request.bounds;
    let dt = ctx.request.dt;

    // braking saturates at v_min, acceleration at v_max
    let v_lo = (cell.v.lo + b.a_lon_min * dt).max(b.v_lon_min);
    let v_hi = (cell.v.hi + b.a_lon_max * dt).max(b.v_lon_min).min(b.v_lon_max);
    let v = Interval::new(v_lo, v_hi);
    if v.is_empty() {
        return None;
    }

    let mut s = Interval::new(
        cell.s.lo + 0.5 * (cell.v.lo + v.lo) * dt,
        cell.s.hi + 0.5 * (cell.v.hi + v.hi) * dt,
    );

    let old: Vec<(u64, Interval)> = ctx.occupied(cell.lane, k).map(|(o, at)| (o.obstacle_id, at.s)).collect();
    for (occupancy, at) in ctx.occupied(cell.lane, k + 1) {
        let Some((_, before)) = old.iter().find(|(id, _)| *id == occupancy.obstacle_id) else {
            continue;
        };
        if cell.s.hi <= before.lo {
            s.hi = s.hi.min(at.s.lo - ctx.margin);
        } else if cell.s.lo >= before.hi {
            s.lo = s.lo.max(at.s.hi + ctx.margin);
        }
    }

    let s = s.intersect(&ctx.request.corridor.lanes()[cell.lane].s_range);
    if s.is_empty() {
        return None;
    }
    Some(ReachCell {
        lane: cell.lane,
        s,
        v,
        committed: cell.committed,
        dwell: cell.dwell + 1,
    })
}

fn lane_changes(ctx: &StepContext<'_, '_>, cell: &ReachCell) -> Vec<ReachCell> {
    let lanes = ctx.request.corridor.lanes();
    let from = lanes[cell.lane].lateral_index;
    lanes
        .iter()
        .enumerate()
        .filter(|(j, lane)| (lane.lateral_index - from).abs() == 1 && ctx.allowed[*j])
        .filter_map(|(j, lane)| {
            let s = cell.s.intersect(&lane.s_range);
            (!s.is_empty()).then(|| ReachCell {
                lane: j,
                s,
                v: cell.v,
                committed: ctx.is_target(j),
                dwell: 0,
            })
        })
        .collect()
}

/// Applies the per-step constraints, the final filters and merging.
fn finish_layer(ctx: &StepContext<'_, '_>, cells: Vec<ReachCell>, step: usize) -> Vec<ReachCell> {
    let request = ctx.request;
    let mut kept = Vec::with_capacity(cells.len());

    for cell in cells {
        if !ctx.allowed[cell.lane] {
            continue;
        }

        let mut parts = vec![cell.s];
        for (_, at) in ctx.occupied(cell.lane, step) {
            let blocked = at.s.inflate(ctx.margin);
            parts = parts.iter().flat_map(|p| p.subtract(&blocked)).collect();
        }

        for s in parts {
            let mut piece = ReachCell { s, ..cell.clone() };
            if !cap_safe_distance(ctx, &mut piece, step) {
                continue;
            }
            kept.push(piece);
        }
    }

    if step == request.horizon {
        kept = final_filter(ctx, kept);
    }
    merge(kept)
}

/// Caps cells behind every SafeDistance obstacle. False if nothing is left.
fn cap_safe_distance(ctx: &StepContext<'_, '_>, cell: &mut ReachCell, step: usize) -> bool {
    let request = ctx.request;
    for id in request.specification.safe_distance_to() {
        for (occupancy, at) in ctx.occupied(cell.lane, step) {
            if occupancy.obstacle_id != id || cell.s.lo > at.s.lo {
                continue;
            }
            let gap = safe_distance(
                cell.v.hi,
                at.v.lo.max(0.0),
                request.ego_braking,
                request.other_braking,
                request.reaction_time,
            );
            cell.s.hi = cell.s.hi.min(at.s.lo - ctx.margin - gap);
            if cell.s.is_empty() {
                return false;
            }
        }
    }
    true
}

fn final_filter(ctx: &StepContext<'_, '_>, cells: Vec<ReachCell>) -> Vec<ReachCell> {
    let request = ctx.request;
    let standstill = request.specification.requires_standstill();
    cells
        .into_iter()
        .filter(|c| ctx.targets.is_none() || (c.committed && ctx.is_target(c.lane)))
        .filter_map(|mut c| {
            if standstill {
                c.v = c.v.intersect(&Interval::new(request.bounds.v_lon_min, request.v_err));
                if c.v.is_empty() {
                    return None;
                }
            }
            Some(c)
        })
        .collect()
}

/// Merges cells of the same lane and commitment whose positions overlap.
/// The merged dwell is the smaller one.
fn merge(mut cells: Vec<ReachCell>) -> Vec<ReachCell> {
    cells.sort_by(|a, b| {
        (a.lane, a.committed)
            .cmp(&(b.lane, b.committed))
            .then(a.s.lo.total_cmp(&b.s.lo))
    });

    let mut merged: Vec<ReachCell> = Vec::with_capacity(cells.len());
    for cell in cells {
        if let Some(last) = merged.last_mut() {
            if last.lane == cell.lane
                && last.committed == cell.committed
                && cell.s.lo <= last.s.hi + EPS
            {
                last.s = last.s.hull(&cell.s);
                last.v = last.v.hull(&cell.v);
                last.dwell = last.dwell.min(cell.dwell);
                continue;
            }
        }
        merged.push(cell);
    }
    merged
}
