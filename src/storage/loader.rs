use std::{
    fs,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2};

use crate::error::JobError;

/// Where sensing matrices and signals come from.
///
/// Implementations are called from the blocking pool.
pub trait DataSource: Send + Sync {
    /// Loads the sensing matrix a job refers to.
    fn load_matrix(&self, model: &str) -> Result<Array2<f64>, JobError>;

    /// Loads the signal a job refers to.
    fn load_vector(&self, signal: &str) -> Result<Array1<f64>, JobError>;
}

/// Reads comma separated files.
///
/// Models are opened at the path the client sent. Signals are resolved as
/// `<signal_root>/<signal>.<extension>`.
#[derive(Debug, Clone)]
pub struct CsvSource {
    signal_root: PathBuf,
    extension: String,
}

impl CsvSource {
    /// Creates a new `CsvSource`.
    ///
    /// # Arguments
    /// * `signal_root` - The directory signal names are relative to.
    /// * `extension` - The extension appended to signal names.
    pub fn new(signal_root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            signal_root: signal_root.into(),
            extension: extension.into(),
        }
    }

    fn signal_path(&self, signal: &str) -> PathBuf {
        self.signal_root.join(format!("{signal}.{}", self.extension))
    }
}

impl DataSource for CsvSource {
    fn load_matrix(&self, model: &str) -> Result<Array2<f64>, JobError> {
        let path = Path::new(model);
        let rows = read_rows(path)?;

        let Some(cols) = rows.first().map(Vec::len) else {
            return Err(JobError::Shape(format!("{} is empty", path.display())));
        };

        if let Some(line) = rows.iter().position(|row| row.len() != cols) {
            return Err(JobError::Shape(format!(
                "{} row {} has {} values, expected {cols}",
                path.display(),
                line + 1,
                rows[line].len()
            )));
        }

        let nrows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((nrows, cols), data).map_err(|e| JobError::Shape(e.to_string()))
    }

    fn load_vector(&self, signal: &str) -> Result<Array1<f64>, JobError> {
        let path = self.signal_path(signal);
        let values: Vec<f64> = read_rows(&path)?.into_iter().flatten().collect();
        Ok(Array1::from(values))
    }
}

/// Parses every non-blank line into its comma separated values.
///
/// Values are read at single precision and widened, which is how the model files
/// were produced.
fn read_rows(path: &Path) -> Result<Vec<Vec<f64>>, JobError> {
    let content = fs::read_to_string(path).map_err(|source| JobError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            line.split(',')
                .map(|value| {
                    let value = value.trim();
                    value.parse::<f32>().map(f64::from).map_err(|_| JobError::Parse {
                        path: path.to_path_buf(),
                        line: i + 1,
                        value: value.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, JobError>>()
        })
        .collect()
}
