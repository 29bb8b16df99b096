use anyhow::{anyhow, Result};
use serde::Serialize;

/// Floats per detection row in the `[1, N, 6]` output tensor.
pub const OUTPUT_STRIDE: usize = 6;

/// One detected box in model-input-square coordinates (0..target_size).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Confidence in [0, 1].
    pub score: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Negative-area boxes are never drawn.
    pub fn is_degenerate(&self) -> bool {
        self.x2 < self.x1 || self.y2 < self.y1
    }

    fn is_finite(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.score.is_finite()
    }

    /// Decode one `x1, y1, x2, y2, score, class_id` row.
    pub fn from_row(row: &[f32]) -> Option<Self> {
        let [x1, y1, x2, y2, score, class_id] = <[f32; OUTPUT_STRIDE]>::try_from(row).ok()?;
        let detection = Self {
            x1,
            y1,
            x2,
            y2,
            score: score.clamp(0.0, 1.0),
            class_id: if class_id.is_finite() && class_id >= 0.0 {
                class_id.round() as u32
            } else {
                0
            },
        };
        Some(detection)
    }
}

/// Decode the flattened `[1, N, 6]` output of a post-NMS detector.
///
/// Empty slots (score <= 0), non-finite rows and degenerate boxes are removed;
/// at most `max_detections` rows are kept, in output order.
pub fn decode_output(data: &[f32], max_detections: usize) -> Result<Vec<Detection>> {
    if data.len() % OUTPUT_STRIDE != 0 {
        return Err(anyhow!(
            "detector output length {} is not a multiple of {}",
            data.len(),
            OUTPUT_STRIDE
        ));
    }
    let detections = data
        .chunks_exact(OUTPUT_STRIDE)
        .take(max_detections)
        .filter(|row| row[4].is_finite() && row[4] > 0.0)
        .filter_map(Detection::from_row)
        .filter(|d| d.is_finite() && !d.is_degenerate())
        .collect();
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rows_in_order() -> Result<()> {
        let data = [
            10.0, 20.0, 110.0, 220.0, 0.9, 0.0, //
            5.0, 5.0, 15.0, 25.0, 0.4, 2.0,
        ];
        let detections = decode_output(&data, 300)?;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[1].class_id, 2);
        assert_eq!(detections[0].width(), 100.0);
        assert_eq!(detections[0].height(), 200.0);
        Ok(())
    }

    #[test]
    fn drops_empty_slots_and_degenerate_boxes() -> Result<()> {
        let data = [
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // padding slot
            50.0, 50.0, 40.0, 60.0, 0.8, 1.0, // x2 < x1
            f32::NAN, 0.0, 10.0, 10.0, 0.7, 0.0, // non-finite
            1.0, 1.0, 2.0, 2.0, 0.6, 3.0,
        ];
        let detections = decode_output(&data, 300)?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 3);
        Ok(())
    }

    #[test]
    fn clamps_scores_and_caps_count() -> Result<()> {
        let mut data = Vec::new();
        for _ in 0..5 {
            data.extend_from_slice(&[0.0, 0.0, 1.0, 1.0, 1.5, 0.0]);
        }
        let detections = decode_output(&data, 3)?;
        assert_eq!(detections.len(), 3);
        assert!(detections.iter().all(|d| d.score == 1.0));
        Ok(())
    }

    #[test]
    fn rejects_ragged_output() {
        assert!(decode_output(&[0.0; 7], 300).is_err());
    }
}
