use std::path::PathBuf;

use fleetrun_proto::CpuUsageResponse;

use crate::HandlerError;

pub const LOADAVG_PATH: &str = "/proc/loadavg";

pub struct HostMetricsService {
    loadavg_path: PathBuf,
}

impl HostMetricsService {
    pub fn new(loadavg_path: impl Into<PathBuf>) -> Self {
        Self {
            loadavg_path: loadavg_path.into(),
        }
    }

    pub async fn cpu_usage(&self) -> Result<CpuUsageResponse, HandlerError> {
        let content = tokio::fs::read_to_string(&self.loadavg_path)
            .await
            .map_err(|e| {
                HandlerError::Internal(format!(
                    "failed to read {}: {e}",
                    self.loadavg_path.display()
                ))
            })?;
        parse_loadavg(&content)
    }
}

impl Default for HostMetricsService {
    fn default() -> Self {
        Self::new(LOADAVG_PATH)
    }
}

/// Parse the first three fields of `/proc/loadavg`, truncating each to an
/// integer.
pub fn parse_loadavg(content: &str) -> Result<CpuUsageResponse, HandlerError> {
    let mut fields = content.split_whitespace().map(|field| {
        field
            .parse::<f64>()
            .map(|value| value.trunc() as i32)
            .map_err(|_| HandlerError::Internal(format!("malformed load average '{field}'")))
    });

    let mut next = || {
        fields
            .next()
            .unwrap_or_else(|| Err(HandlerError::Internal("truncated load average".to_string())))
    };

    Ok(CpuUsageResponse {
        load_avg1: next()?,
        load_avg5: next()?,
        load_avg15: next()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_loadavg_truncates() {
        let res = parse_loadavg("2.91 1.47 0.99 3/1024 123456\n").unwrap();
        assert_eq!(
            res,
            CpuUsageResponse {
                load_avg1: 2,
                load_avg5: 1,
                load_avg15: 0
            }
        );
    }

    #[test]
    fn test_parse_loadavg_rejects_garbage() {
        assert!(parse_loadavg("").is_err());
        assert!(parse_loadavg("1.0 2.0").is_err());
        assert!(parse_loadavg("a b c").is_err());
    }

    #[tokio::test]
    async fn test_cpu_usage_reads_configured_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "12.50 8.75 4.01 7/900 4242").unwrap();

        let res = HostMetricsService::new(file.path()).cpu_usage().await.unwrap();
        assert_eq!((res.load_avg1, res.load_avg5, res.load_avg15), (12, 8, 4));
    }

    #[tokio::test]
    async fn test_missing_loadavg_is_internal_error() {
        let service = HostMetricsService::new("/nonexistent/loadavg");
        assert!(matches!(
            service.cpu_usage().await,
            Err(HandlerError::Internal(_))
        ));
    }
}
