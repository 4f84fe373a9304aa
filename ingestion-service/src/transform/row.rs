use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    sources::RawImageRow,
};

pub const DEPTH_COLUMN: &str = "depth";

/// A pixel sample as parsed from the CSV. `None` marks a value that was not an integer.
pub type PixelValue = Option<i64>;

/// A CSV row after numeric parsing, before rasterisation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub depth: f64,
    pub pixels: Vec<PixelValue>,
}

impl DecodedRow {
    /// 8-bit samples for a single-channel raster: markers become 0 and integers keep their
    /// low byte.
    pub fn samples(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .map(|p| p.map_or(0, |v| (v & 0xFF) as u8))
            .collect()
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RowError {
    #[error("row has no 'depth' column")]
    MissingDepth,
    #[error("invalid depth '{0}'")]
    InvalidDepth(String),
    #[error("non-numeric pixel '{value}' in column '{column}'")]
    NonNumericPixel { column: String, value: String },
}

/// What to do with pixel values that are not integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelPolicy {
    /// Keep the row; the value travels on as a marker and rasterises as 0.
    #[default]
    Lenient,
    /// Reject the whole row.
    Strict,
}

/// Integer prefix of `s`: optional leading whitespace and sign, then decimal digits.
///
/// `"12.7"` gives 12 and `"7px"` gives 7. No digits gives `None`; a value past the `i64`
/// range saturates to `i64::MAX` or `i64::MIN`.
pub fn parse_int_prefix(s: &str) -> PixelValue {
    let s = s.trim_start();
    let (sign_len, negative) = match s.as_bytes().first() {
        Some(b'-') => (1, true),
        Some(b'+') => (1, false),
        _ => (0, false),
    };
    let digits = s[sign_len..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }

    let value = s.as_bytes()[sign_len..sign_len + digits]
        .iter()
        .fold(0i64, |acc, b| {
            let digit = i64::from(b - b'0');
            if negative {
                acc.saturating_mul(10).saturating_sub(digit)
            } else {
                acc.saturating_mul(10).saturating_add(digit)
            }
        });
    Some(value)
}

fn parse_depth(raw: &str) -> Result<f64, RowError> {
    match raw.trim().parse::<f64>() {
        Ok(depth) if depth.is_finite() => Ok(depth),
        _ => Err(RowError::InvalidDepth(raw.to_string())),
    }
}

/// Split a raw row into its depth and pixel samples, pixels in column order.
pub fn transform_row(row: &RawImageRow, policy: PixelPolicy) -> Result<DecodedRow, RowError> {
    let depth = parse_depth(row.get(DEPTH_COLUMN).ok_or(RowError::MissingDepth)?)?;

    let mut pixels = Vec::with_capacity(row.len().saturating_sub(1));
    for (column, value) in row.fields().filter(|(column, _)| *column != DEPTH_COLUMN) {
        let pixel = parse_int_prefix(value);
        if pixel.is_none() && policy == PixelPolicy::Strict {
            return Err(RowError::NonNumericPixel {
                column: column.to_string(),
                value: value.to_string(),
            });
        }
        pixels.push(pixel);
    }

    Ok(DecodedRow { depth, pixels })
}

#[derive(Clone, Default)]
pub struct RowTransformer {
    policy: PixelPolicy,
}

impl RowTransformer {
    pub fn new(policy: PixelPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Transform<RawImageRow, DecodedRow> for RowTransformer {
    async fn apply(&self, input: Envelope<RawImageRow>) -> Result<Envelope<DecodedRow>, PipelineError> {
        match transform_row(&input.payload, self.policy) {
            Ok(decoded) => Ok(input.map(|_| decoded)),
            Err(e) => Err(PipelineError::row(input.position, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::StringRecord;
    use std::sync::Arc;

    fn row(headers: &[&str], values: &[&str]) -> RawImageRow {
        RawImageRow::new(Arc::new(StringRecord::from(headers.to_vec())), StringRecord::from(values.to_vec()))
    }

    #[test]
    fn depth_and_pixels_split_in_column_order() {
        let r = row(&["col1", "depth", "col2", "col3"], &["10", "9000.5", "20", "255"]);

        let decoded = transform_row(&r, PixelPolicy::Lenient).unwrap();
        assert_eq!(decoded.depth, 9000.5);
        assert_eq!(decoded.pixels, vec![Some(10), Some(20), Some(255)]);
    }

    #[test]
    fn unparseable_depth_rejects_the_row() {
        let r = row(&["depth", "col1"], &["deep", "1"]);
        assert_eq!(
            transform_row(&r, PixelPolicy::Lenient),
            Err(RowError::InvalidDepth("deep".to_string()))
        );

        let r = row(&["depth", "col1"], &["inf", "1"]);
        assert!(transform_row(&r, PixelPolicy::Lenient).is_err());

        let r = row(&["col1"], &["1"]);
        assert_eq!(transform_row(&r, PixelPolicy::Lenient), Err(RowError::MissingDepth));
    }

    #[test]
    fn non_numeric_pixels_become_markers_by_default() {
        let r = row(&["depth", "col1", "col2", "col3"], &["1", "abc", "12.9", "-3"]);

        let decoded = transform_row(&r, PixelPolicy::Lenient).unwrap();
        assert_eq!(decoded.pixels, vec![None, Some(12), Some(-3)]);
        assert_eq!(decoded.samples(), vec![0, 12, 253]);
    }

    #[test]
    fn strict_policy_rejects_non_numeric_pixels() {
        let r = row(&["depth", "col1", "col2"], &["1", "7", ""]);

        assert_eq!(
            transform_row(&r, PixelPolicy::Strict),
            Err(RowError::NonNumericPixel {
                column: "col2".to_string(),
                value: String::new()
            })
        );
    }

    #[test]
    fn integer_prefix_parsing() {
        assert_eq!(parse_int_prefix("  42"), Some(42));
        assert_eq!(parse_int_prefix("+8"), Some(8));
        assert_eq!(parse_int_prefix("7px"), Some(7));
        assert_eq!(parse_int_prefix("-"), None);
        assert_eq!(parse_int_prefix("x1"), None);
        assert_eq!(parse_int_prefix("99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_int_prefix("-99999999999999999999"), Some(i64::MIN));
        assert_eq!(parse_int_prefix("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int_prefix("300"), Some(300));
    }

    #[tokio::test]
    async fn transform_errors_carry_row_position() {
        let env = Envelope::new(row(&["depth", "col1"], &["?", "1"]), 17);

        let err = RowTransformer::default().apply(env).await.unwrap_err();
        assert!(matches!(err, PipelineError::Row { position: 17, .. }));
    }
}
