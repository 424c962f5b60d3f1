//! Margin, lookahead and crop-offset negotiation.

use contracts::{
    Dimension, EisCalibration, EisNodeConfig, MarginRatio, MetadataAccessor, MetadataTag,
    OverrideSettings, StabilizationMargin, DEFAULT_FRAME_DELAY, DEFAULT_MARGIN,
    GYRO_SAMPLING_RATE_HZ, MAX_FRAME_DELAY, REQUEST_QUEUE_RESERVE,
};
use serde::Serialize;

const DEFAULT_TARGET_FPS: u32 = 30;

/// Result of the usecase margin query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarginNegotiation {
    /// Lookahead in frames
    pub lookahead: u32,
    /// Lookahead ring depth
    pub queue_depth: u32,
    /// Requested margin, as a fraction of the output size
    pub requested: MarginRatio,
}

/// Negotiate margins and lookahead for an output size and frame rate
pub fn negotiate_for(
    calibration: Option<&EisCalibration>,
    overrides: &OverrideSettings,
    output: Dimension,
    fps: u32,
) -> MarginNegotiation {
    let (mut margin, frame_delay) = match calibration {
        Some(calibration) => {
            let tier = calibration.tier(output.height, fps);
            (
                MarginRatio::new(
                    calibration.minimal_total_margin.min(tier.margin_y),
                    tier.margin_y,
                ),
                tier.frame_delay,
            )
        }
        None => (MarginRatio::uniform(DEFAULT_MARGIN), DEFAULT_FRAME_DELAY),
    };

    let mut frame_delay = frame_delay.min(MAX_FRAME_DELAY);
    if let Some(delay) = overrides.frame_delay() {
        frame_delay = delay.min(MAX_FRAME_DELAY);
    }
    if let Some(width) = overrides.width_margin() {
        margin.width = width;
    }
    if let Some(height) = overrides.height_margin() {
        margin.height = height;
    }

    MarginNegotiation {
        lookahead: frame_delay,
        queue_depth: frame_delay + REQUEST_QUEUE_RESERVE,
        requested: MarginRatio::new(
            total_to_requested(margin.width),
            total_to_requested(margin.height),
        ),
    }
}

/// Negotiate from the usecase tags (`TargetFps`, preview and video sizes)
pub fn negotiate(config: &EisNodeConfig, metadata: &dyn MetadataAccessor) -> MarginNegotiation {
    let fps = metadata
        .get_usecase(MetadataTag::TargetFps)
        .and_then(|v| v.as_u32())
        .unwrap_or(DEFAULT_TARGET_FPS);
    let preview = usecase_dimension(metadata, MetadataTag::PreviewDimensions);
    let video = usecase_dimension(metadata, MetadataTag::VideoDimensions);
    let output = preview.larger_area(video);

    let negotiation = negotiate_for(config.calibration.as_ref(), &config.overrides, output, fps);
    tracing::info!(
        fps,
        output_width = output.width,
        output_height = output.height,
        lookahead = negotiation.lookahead,
        queue_depth = negotiation.queue_depth,
        margin_x = negotiation.requested.width,
        margin_y = negotiation.requested.height,
        "Margins negotiated"
    );
    negotiation
}

/// Lower bound of the total margin
pub fn min_total_margins(calibration: Option<&EisCalibration>) -> MarginRatio {
    match calibration {
        Some(calibration) => MarginRatio::uniform(calibration.minimal_total_margin),
        None => MarginRatio::uniform(DEFAULT_MARGIN),
    }
}

/// Gyro rate to register with the motion service
pub fn gyro_frequency(calibration: Option<&EisCalibration>) -> u32 {
    match calibration.map(|c| c.gyro_frequency) {
        Some(hz) if hz > 0 && hz <= GYRO_SAMPLING_RATE_HZ => hz,
        _ => GYRO_SAMPLING_RATE_HZ,
    }
}

/// Offset between the engine margins and the physical input/output difference
pub fn additional_crop_offset(
    input: Dimension,
    output: Dimension,
    margins: StabilizationMargin,
) -> StabilizationMargin {
    let physical = StabilizationMargin::new(
        input.width.saturating_sub(output.width) & !1,
        input.height.saturating_sub(output.height) & !1,
    );

    if margins.width >= physical.width && margins.height >= physical.height {
        StabilizationMargin::new(
            margins.width - physical.width,
            margins.height - physical.height,
        )
    } else {
        tracing::error!(
            margin_width = margins.width,
            margin_height = margins.height,
            physical_width = physical.width,
            physical_height = physical.height,
            "Physical margin larger than engine margin"
        );
        StabilizationMargin::default()
    }
}

/// Total margin fraction of the input to requested fraction of the output
fn total_to_requested(margin: f32) -> f32 {
    1.0 / (1.0 - margin) - 1.0
}

fn usecase_dimension(metadata: &dyn MetadataAccessor, tag: MetadataTag) -> Dimension {
    metadata
        .get_usecase(tag)
        .and_then(|v| v.as_dimension())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FpsTierTable, MarginTier};

    fn calibration() -> EisCalibration {
        let table = |margin_y: f32, base_delay: u32| FpsTierTable {
            fps30: MarginTier {
                margin_y,
                frame_delay: base_delay,
            },
            fps60: MarginTier {
                margin_y: margin_y + 0.05,
                frame_delay: base_delay + 2,
            },
            fps_high: MarginTier {
                margin_y: margin_y + 0.1,
                frame_delay: 40,
            },
        };
        EisCalibration {
            minimal_total_margin: 0.1,
            gyro_frequency: 500,
            fhd: table(0.2, 10),
            uhd4k: table(0.25, 12),
            uhd8k: table(0.3, 14),
        }
    }

    #[test]
    fn test_defaults_without_calibration() {
        let n = negotiate_for(
            None,
            &OverrideSettings::default(),
            Dimension::new(1920, 1080),
            30,
        );
        assert_eq!(n.lookahead, 15);
        assert_eq!(n.queue_depth, 23);
        assert!((n.requested.width - 0.25).abs() < 1e-6);
        assert!((n.requested.height - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_calibration_tier_and_cap() {
        let cal = calibration();
        let n = negotiate_for(
            Some(&cal),
            &OverrideSettings::default(),
            Dimension::new(3840, 2160),
            60,
        );
        assert_eq!(n.lookahead, 14);
        assert_eq!(n.queue_depth, 22);
        // x margin is bounded by the minimal total margin
        assert!((n.requested.width - (1.0 / 0.9 - 1.0)).abs() < 1e-6);
        assert!((n.requested.height - (1.0 / 0.7 - 1.0)).abs() < 1e-6);

        let high = negotiate_for(
            Some(&cal),
            &OverrideSettings::default(),
            Dimension::new(1920, 1080),
            120,
        );
        assert_eq!(high.lookahead, MAX_FRAME_DELAY);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = OverrideSettings {
            width_margin: 0.5,
            frame_delay: 4,
            ..Default::default()
        };
        let n = negotiate_for(None, &overrides, Dimension::new(1920, 1080), 30);
        assert_eq!(n.lookahead, 4);
        assert_eq!(n.queue_depth, 12);
        assert!((n.requested.width - 1.0).abs() < 1e-6);
        assert!((n.requested.height - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_gyro_frequency_cap() {
        let mut cal = calibration();
        assert_eq!(gyro_frequency(Some(&cal)), GYRO_SAMPLING_RATE_HZ);
        cal.gyro_frequency = 200;
        assert_eq!(gyro_frequency(Some(&cal)), 200);
        cal.gyro_frequency = 0;
        assert_eq!(gyro_frequency(Some(&cal)), GYRO_SAMPLING_RATE_HZ);
        assert_eq!(gyro_frequency(None), GYRO_SAMPLING_RATE_HZ);
    }

    #[test]
    fn test_additional_crop_offset() {
        let input = Dimension::new(2305, 1297);
        let output = Dimension::new(1920, 1080);
        // physical margin aligns down to 384x216
        let offset = additional_crop_offset(input, output, StabilizationMargin::new(400, 220));
        assert_eq!(offset, StabilizationMargin::new(16, 4));

        let offset = additional_crop_offset(input, output, StabilizationMargin::new(100, 220));
        assert_eq!(offset, StabilizationMargin::default());
    }

    #[test]
    fn test_min_total_margins() {
        assert_eq!(min_total_margins(None), MarginRatio::uniform(0.2));
        assert_eq!(
            min_total_margins(Some(&calibration())),
            MarginRatio::uniform(0.1)
        );
    }
}
