use std::thread;
use std::time::Duration;

use image::{GrayImage, RgbImage};
use tapevision_core::FrameBuffer;
use tapevision_runtime::{
    CameraConfig, DiscoveredSource, EventBus, FrameSource, MemoryConfigStore, ModuleManager,
    SourceError, StaticSource,
};

/// Serves single-channel frames, which the tape pipeline rejects.
struct MaskSource;

impl FrameSource for MaskSource {
    fn id(&self) -> &str {
        "broken"
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SourceError> {
        thread::sleep(Duration::from_millis(5));
        Ok(FrameBuffer::acquire(GrayImage::new(16, 16)))
    }
}

#[test]
fn a_failing_camera_does_not_stall_the_others() {
    let _ = env_logger::builder().is_test(true).try_init();
    let events = EventBus::default();
    let results = events.results.subscribe();
    let manager = ModuleManager::new(std::sync::Arc::new(MemoryConfigStore::new()), events);

    let healthy = DiscoveredSource {
        source: Box::new(StaticSource::new("healthy", RgbImage::new(16, 16), 100.0)),
        defaults: Some(CameraConfig::default()),
        calibration: None,
    };
    let added = manager.add_sources(vec![DiscoveredSource::new(Box::new(MaskSource)), healthy]);
    assert_eq!(added, vec!["broken", "healthy"]);

    let mut healthy_events = 0;
    while healthy_events < 5 {
        let event = results
            .recv_timeout(Duration::from_secs(2))
            .expect("healthy camera keeps publishing");
        assert_eq!(event.source_id, "healthy");
        healthy_events += 1;
    }

    let broken = manager.get("broken").expect("registered");
    assert!(broken.is_running());
    assert!(broken.stats().failed_iterations > 0);
    manager.stop_all();
}
