use serde::{Deserialize, Serialize};

/// Deepest feature nesting the codec accepts, bounded by serde_json's own
/// recursion limit of 128 nested containers.
pub const MAX_SUPPORTED_DEPTH: usize = 56;

const DEFAULT_MAX_DEPTH: usize = 32;

/// Settings for [`TextCodec`](crate::TextCodec).
/// 文字編解碼器的設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Maximum feature depth below the root collection.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Emit indented text.
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_true() -> bool {
    true
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            pretty: true,
        }
    }
}

impl CodecConfig {
    /// Clamps values into the supported range.
    pub fn sanitize(&mut self) {
        self.max_depth = self.max_depth.clamp(1, MAX_SUPPORTED_DEPTH);
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self.sanitize();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: CodecConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CodecConfig::default());
        let config: CodecConfig = serde_json::from_str(r#"{"pretty":false}"#).unwrap();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!config.pretty);
    }

    #[test]
    fn sanitize_clamps_depth() {
        let mut config = CodecConfig {
            max_depth: 0,
            pretty: true,
        };
        config.sanitize();
        assert_eq!(config.max_depth, 1);
        assert_eq!(
            CodecConfig::default().with_max_depth(10_000).max_depth,
            MAX_SUPPORTED_DEPTH
        );
    }
}
