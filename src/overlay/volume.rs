use crate::analysis::types::Track;
use crate::overlay::types::OverlayTarget;

/// Per-beat loudness mapped onto [0, 1], smoothed by a windowed median
pub fn normalized_volumes(track: &Track, window: usize) -> Vec<f64> {
    let raw: Vec<f64> = track.beats.iter().map(|b| b.loudness()).collect();
    let Some(min) = raw.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = raw.iter().copied().fold(min, f64::max);
    let range = max - min;

    let volumes: Vec<f64> = raw
        .iter()
        .map(|v| if range > f64::EPSILON { (v - min) / range } else { 1.0 })
        .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
        .collect();

    window_median(&volumes, window)
}

fn window_median(values: &[f64], window: usize) -> Vec<f64> {
    let half = window.max(1) / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(values.len() - 1);
            let mut slice = values[start..=end].to_vec();
            slice.sort_by(|a, b| a.total_cmp(b));
            slice[slice.len() / 2]
        })
        .collect()
}

/// Replace non-finite gains by zero and clamp into [0, 1]
pub fn sanitize_gains(targets: &mut [OverlayTarget]) {
    for target in targets {
        target.gain = if target.gain.is_finite() { target.gain.clamp(0.0, 1.0) } else { 0.0 };
    }
}
