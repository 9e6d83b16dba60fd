use std::sync::Mutex;

use async_trait::async_trait;
use sysinfo::System;

use crate::stats::provider::{ProviderError, StatsProvider};
use crate::stats::snapshot::{SectionData, SystemStats};

/// 进程和主机资源占用
pub struct SystemProvider {
    sys: Mutex<System>,
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl SystemProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsProvider for SystemProvider {
    fn name(&self) -> &str {
        "system"
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        sys.refresh_cpu();

        let process_memory_mb = match sysinfo::get_current_pid() {
            Ok(pid) => {
                sys.refresh_process(pid);
                sys.process(pid)
                    .map(|process| process.memory() / 1024 / 1024)
                    .unwrap_or(0)
            }
            Err(e) => return Err(ProviderError::Unavailable(e.to_string())),
        };

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(SectionData::System(SystemStats {
            process_memory_mb,
            system_memory_used_mb: sys.used_memory() / 1024 / 1024,
            system_memory_total_mb: sys.total_memory() / 1024 / 1024,
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            threads,
        }))
    }
}
