//! Gap-free data-coverage intervals common to every channel, and sample
//! extraction for one analysis window.

use serde::{Deserialize, Serialize};

use crate::channel::WaveformSegment;

/// Half-open time interval in seconds of epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub tbeg: f64,
    pub tend: f64,
}

impl TimeSpan {
    pub fn new(tbeg: f64, tend: f64) -> Self {
        Self { tbeg, tend }
    }

    pub fn duration(&self) -> f64 {
        self.tend - self.tbeg
    }

    pub fn is_empty(&self) -> bool {
        self.tend <= self.tbeg
    }
}

/// All segments belonging to one logical channel, ordered by start time.
#[derive(Debug)]
pub struct ChannelGroup<'a> {
    pub id: String,
    pub segments: Vec<&'a WaveformSegment>,
}

impl<'a> ChannelGroup<'a> {
    /// Representative segment carrying the channel's station metadata.
    pub fn head(&self) -> &'a WaveformSegment {
        self.segments[0]
    }

    /// Contiguous runs of this channel, abutting segments merged when the
    /// gap stays below half a sample interval.
    pub fn runs(&self) -> Vec<TimeSpan> {
        let mut runs: Vec<TimeSpan> = Vec::new();
        for seg in &self.segments {
            let tol = seg.dt * 0.5;
            match runs.last_mut() {
                Some(run) if seg.tbeg <= run.tend + tol => {
                    run.tend = run.tend.max(seg.tend());
                }
                _ => runs.push(TimeSpan::new(seg.tbeg, seg.tend())),
            }
        }
        runs
    }

    /// Fill `out` with `out.len()` samples starting at `tbeg`, stepping by
    /// `dt`. Returns false when any sample falls outside this channel's
    /// segments; coverage-validated callers never see that.
    pub fn fill_window(&self, tbeg: f64, dt: f64, out: &mut [f64]) -> bool {
        for (i, slot) in out.iter_mut().enumerate() {
            let t = tbeg + i as f64 * dt;
            let mut found = false;
            for seg in &self.segments {
                if t < seg.tbeg - seg.dt * 0.5 {
                    break;
                }
                let idx = ((t - seg.tbeg) / seg.dt).round() as isize;
                if idx >= 0 && (idx as usize) < seg.samples.len() {
                    *slot = seg.samples[idx as usize];
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }
}

/// Group segments into logical channels by `STATION.CHANNEL`, preserving
/// first-appearance order, segments sorted by start time within a group.
pub fn group_channels(segments: &[WaveformSegment]) -> Vec<ChannelGroup<'_>> {
    let mut groups: Vec<ChannelGroup> = Vec::new();
    for seg in segments {
        let id = seg.id();
        match groups.iter_mut().find(|g| g.id == id) {
            Some(group) => group.segments.push(seg),
            None => groups.push(ChannelGroup {
                id,
                segments: vec![seg],
            }),
        }
    }
    for group in &mut groups {
        group
            .segments
            .sort_by(|a, b| a.tbeg.partial_cmp(&b.tbeg).unwrap_or(std::cmp::Ordering::Equal));
    }
    groups
}

/// Intersection of the gap-free runs of every group, clipped to `span`.
pub fn common_coverage(groups: &[ChannelGroup<'_>], span: Option<TimeSpan>) -> Vec<TimeSpan> {
    let mut common: Option<Vec<TimeSpan>> = None;
    for group in groups {
        let runs = group.runs();
        common = Some(match common {
            None => runs,
            Some(current) => intersect(&current, &runs),
        });
    }
    let mut common = common.unwrap_or_default();
    if let Some(span) = span {
        common = intersect(&common, &[span]);
    }
    common.retain(|s| !s.is_empty());
    common
}

fn intersect(a: &[TimeSpan], b: &[TimeSpan]) -> Vec<TimeSpan> {
    let mut out = Vec::new();
    for sa in a {
        for sb in b {
            let tbeg = sa.tbeg.max(sb.tbeg);
            let tend = sa.tend.min(sb.tend);
            if tend > tbeg {
                out.push(TimeSpan::new(tbeg, tend));
            }
        }
    }
    out
}
