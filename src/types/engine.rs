//! Inference engine identity and the Prometheus metric names each engine
//! exposes for the three metrics the scoring engine consumes.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Vllm,
    Sglang,
}

impl EngineType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vllm" => Some(EngineType::Vllm),
            "sglang" => Some(EngineType::Sglang),
            _ => None,
        }
    }

    pub fn metric_names(self) -> EngineMetricNames {
        match self {
            EngineType::Vllm => EngineMetricNames {
                waiting_queue: "vllm:num_requests_waiting",
                cache_usage: "vllm:gpu_cache_usage_perc",
                running_req: "vllm:num_requests_running",
            },
            EngineType::Sglang => EngineMetricNames {
                waiting_queue: "sglang:num_queue_reqs",
                cache_usage: "sglang:token_usage",
                running_req: "sglang:num_running_reqs",
            },
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::Vllm => write!(f, "vllm"),
            EngineType::Sglang => write!(f, "sglang"),
        }
    }
}

pub struct EngineMetricNames {
    pub waiting_queue: &'static str,
    pub cache_usage: &'static str,
    pub running_req: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_engines_case_insensitively() {
        assert_eq!(EngineType::parse("VLLM"), Some(EngineType::Vllm));
        assert_eq!(EngineType::parse("sglang"), Some(EngineType::Sglang));
        assert_eq!(EngineType::parse("bogus"), None);
    }

    #[test]
    fn metric_names_match_spec_table() {
        let names = EngineType::Vllm.metric_names();
        assert_eq!(names.waiting_queue, "vllm:num_requests_waiting");
        assert_eq!(names.cache_usage, "vllm:gpu_cache_usage_perc");
        assert_eq!(names.running_req, "vllm:num_requests_running");
    }
}
