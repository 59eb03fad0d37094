//! Degradation driven through the periodic monitor with a scripted probe.

use parking_lot::Mutex;
use reqbench_core::{MonitorConfig, OpClass, ReliabilityConfig};
use reqbench_reliability::{Level, ReliabilityManager, ResourceProbe, ResourceReading, Signal};
use std::sync::Arc;
use std::time::Duration;

struct ScriptedProbe {
    reading: Mutex<ResourceReading>,
}

impl ScriptedProbe {
    fn set(&self, reading: ResourceReading) {
        *self.reading.lock() = reading;
    }
}

impl ResourceProbe for ScriptedProbe {
    fn sample(&self) -> ResourceReading {
        *self.reading.lock()
    }
}

async fn wait_for(manager: &ReliabilityManager, constrained: bool) {
    for _ in 0..200 {
        if manager.is_resource_constrained() == constrained {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("monitor never reached constrained={constrained}");
}

#[tokio::test]
async fn test_monitor_degrades_and_recovers() {
    let probe = Arc::new(ScriptedProbe {
        reading: Mutex::new(ResourceReading::default()),
    });
    let config = ReliabilityConfig {
        monitor: MonitorConfig {
            interval_ms: 5,
            ..MonitorConfig::default()
        },
        ..ReliabilityConfig::default()
    };
    let manager = ReliabilityManager::with_probe(&config, Arc::clone(&probe) as Arc<dyn ResourceProbe>);

    manager.monitor().start();

    probe.set(ResourceReading {
        memory_mb: 3000.0,
        ..Default::default()
    });
    wait_for(&manager, true).await;

    assert_eq!(manager.monitor().level(Signal::MemoryMb), Level::Critical);
    assert_eq!(manager.adjust_concurrency_for_constraints(10), 5);
    assert!(manager.should_skip_operation(OpClass::SearchSuggestions));
    assert!(manager.reclaimer().cycles() >= 1);

    probe.set(ResourceReading::default());
    wait_for(&manager, false).await;

    assert_eq!(manager.adjust_concurrency_for_constraints(10), 10);
    assert!(!manager.should_skip_operation(OpClass::SearchSuggestions));

    manager.monitor().stop().await;
}
