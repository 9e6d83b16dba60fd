use serde::{Deserialize, Serialize};

/// 命令名最大长度
pub const MAX_COMMAND_NAME_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordCommandResponse {
    pub command: String,
    /// 被清除的缓存条目数
    pub invalidated: usize,
}

pub fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_COMMAND_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names() {
        assert!(is_valid_command_name("daily-reward"));
        assert!(is_valid_command_name("xp_top"));
        assert!(!is_valid_command_name(""));
        assert!(!is_valid_command_name("rm -rf"));
        assert!(!is_valid_command_name(&"a".repeat(65)));
    }
}
