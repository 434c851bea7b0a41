use crate::processing::parallel::NODATA_VALUE_FLOAT;

pub const NODATA_VALUE_INT: i16 = -10000;

/// Scale float values to int16, saturating at the int16 range. Nodata maps
/// to `nodata_value`.
pub fn to_fixed_point(data: &[f32], scale_factor: i32, nodata_value: i16) -> Vec<i16> {
    data.iter()
        .map(|&value| {
            if value == NODATA_VALUE_FLOAT || !value.is_finite() {
                nodata_value
            } else {
                let scaled = (value * scale_factor as f32).round();
                scaled.clamp(-(i16::MAX as f32), i16::MAX as f32) as i16
            }
        })
        .collect()
}
