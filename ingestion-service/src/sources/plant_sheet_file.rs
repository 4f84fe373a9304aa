use std::path::PathBuf;

use calamine::{open_workbook_auto, Data, Range, Reader};
use serde::Deserialize;
use store_client::domain::PlantRecord;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Leading sheet rows holding column titles and descriptions.
const HEADER_ROWS: u32 = 2;

/// Where the plant fields live in the workbook. Column numbers are 1-based (A = 1).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlantSheetLayout {
    pub sheet_name: String,
    pub name_column: u32,
    pub state_column: u32,
    pub net_generation_column: u32,
    pub latitude_column: u32,
    pub longitude_column: u32,
}

impl Default for PlantSheetLayout {
    fn default() -> Self {
        Self {
            sheet_name: "PLNT22".to_string(),
            name_column: 1,
            state_column: 2,
            net_generation_column: 3,
            latitude_column: 4,
            longitude_column: 5,
        }
    }
}

impl PlantSheetLayout {
    pub fn columns(&self) -> [u32; 5] {
        [
            self.name_column,
            self.state_column,
            self.net_generation_column,
            self.latitude_column,
            self.longitude_column,
        ]
    }
}

/// Reads plant rows from one worksheet of an xlsx/xls workbook.
pub struct PlantSheetFileSource {
    path: PathBuf,
    layout: PlantSheetLayout,
}

impl PlantSheetFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, layout: PlantSheetLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }
}

fn cell_text(cell: Option<&Data>) -> Option<String> {
    match cell? {
        Data::Empty => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        other => Some(other.to_string()),
    }
}

fn cell_number(cell: Option<&Data>) -> Result<f64, String> {
    match cell {
        None | Some(Data::Empty) => Ok(0.0),
        Some(Data::Float(f)) => Ok(*f),
        Some(Data::Int(i)) => Ok(*i as f64),
        Some(Data::String(s)) if s.trim().is_empty() => Ok(0.0),
        Some(Data::String(s)) => s
            .trim()
            .parse()
            .map_err(|e| format!("invalid net generation '{s}': {e}")),
        Some(other) => Err(format!("invalid net generation '{other}'")),
    }
}

fn is_blank(cell: Option<&Data>) -> bool {
    cell_text(cell).is_none()
}

/// Extract plant rows from a worksheet range. Positions are 1-based sheet row numbers.
pub fn plants_from_range(
    range: &Range<Data>,
    layout: &PlantSheetLayout,
) -> Vec<Result<Envelope<PlantRecord>, PipelineError>> {
    let (Some((first_row, _)), Some((last_row, _))) = (range.start(), range.end()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in first_row.max(HEADER_ROWS)..=last_row {
        let cell = |column: u32| range.get_value((row, column.saturating_sub(1)));
        if layout.columns().iter().all(|&c| is_blank(cell(c))) {
            continue;
        }

        let position = u64::from(row) + 1;
        let plant = (|| {
            let plant_name = cell_text(cell(layout.name_column)).ok_or("missing plant name")?;
            let state = cell_text(cell(layout.state_column)).ok_or("missing state")?;
            let annual_net_generation = cell_number(cell(layout.net_generation_column))?;
            Ok::<_, String>(PlantRecord {
                plant_name,
                state,
                annual_net_generation,
                latitude: cell_text(cell(layout.latitude_column)),
                longitude: cell_text(cell(layout.longitude_column)),
            })
        })();

        out.push(match plant {
            Ok(p) => Ok(Envelope::new(p, position)),
            Err(reason) => {
                metrics::counter!("plant_rows_rejected_total").increment(1);
                Err(PipelineError::row(position, reason))
            }
        });
    }

    out
}

fn read_sheet(
    path: PathBuf,
    layout: PlantSheetLayout,
) -> Result<Vec<Result<Envelope<PlantRecord>, PipelineError>>, PipelineError> {
    let mut workbook = open_workbook_auto(&path)
        .map_err(|e| PipelineError::Source(format!("failed to open workbook: {e}")))?;
    let range = workbook
        .worksheet_range(&layout.sheet_name)
        .map_err(|e| PipelineError::Source(format!("failed to read sheet '{}': {e}", layout.sheet_name)))?;

    Ok(plants_from_range(&range, &layout))
}

#[async_trait::async_trait]
impl Source<PlantRecord> for PlantSheetFileSource {
    async fn stream(&self) -> EnvelopeStream<PlantRecord> {
        // Workbooks are zip archives and must be decoded whole before any row is available.
        let path = self.path.clone();
        let layout = self.layout.clone();
        let items = match tokio::task::spawn_blocking(move || read_sheet(path, layout)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => vec![Err(e)],
            Err(e) => vec![Err(PipelineError::Source(format!("workbook reader task failed: {e}")))],
        };

        Box::pin(futures::stream::iter(items))
    }
}
