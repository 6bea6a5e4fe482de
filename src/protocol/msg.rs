use serde::{Deserialize, Serialize};

/// Tag carried by job frames and by every response.
pub const JOB_TAG: &str = "2_";

/// The JSON body of a job frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub username: String,
    pub algorithm: String,
    pub model: String,
    pub signal: String,
    pub idx: i64,
}

/// Metadata sent back alongside a reconstructed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub username: String,
    pub index: i64,
    pub algorithm: String,
    pub model: String,
    pub signal: String,
    pub start_dt: String,
    pub end_dt: String,
    pub size: String,
    pub iters: usize,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub header: ResponseHeader,
    /// Base64 encoded PNG.
    pub image: String,
}

/// A response document, written to the client as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: ResponseData,
}

impl Response {
    /// Builds the response for a finished job.
    ///
    /// # Arguments
    /// * `header` - The job metadata.
    /// * `image` - The base64 encoded image.
    pub fn new(header: ResponseHeader, image: String) -> Self {
        Self {
            kind: JOB_TAG.to_string(),
            payload: ResponseData { header, image },
        }
    }

    /// Serializes this response into its wire form.
    ///
    /// # Returns
    /// The JSON document followed by a single `\n`.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ResponseHeader {
        ResponseHeader {
            username: "ana".into(),
            index: 3,
            algorithm: "cgnr".into(),
            model: "models/model-30x30.csv".into(),
            signal: "signals/signal-30x30-0".into(),
            start_dt: "2024-01-01 10:00:00".into(),
            end_dt: "2024-01-01 10:00:02".into(),
            size: "8".into(),
            iters: 5,
            time: 2.5,
        }
    }

    #[test]
    fn response_line_is_newline_terminated_json() {
        let line = Response::new(header(), "aGVsbG8=".into()).to_line().unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "2_");
        assert_eq!(value["payload"]["header"]["index"], 3);
        assert_eq!(value["payload"]["header"]["size"], "8");
        assert_eq!(value["payload"]["image"], "aGVsbG8=");
    }

    #[test]
    fn payload_reads_client_field_names() {
        let body = r#"{"algorithm":"cgne","model":"m.csv","signal":"s","username":"bob","idx":7}"#;
        let payload: JobPayload = serde_json::from_str(body).unwrap();

        assert_eq!(payload.username, "bob");
        assert_eq!(payload.algorithm, "cgne");
        assert_eq!(payload.idx, 7);
    }
}
