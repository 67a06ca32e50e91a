// 集成测试共用的桩实现
#![allow(dead_code)]

use async_trait::async_trait;
use flux_inference::sink::SinkError;
use flux_inference::source::{RawPicture, SourceError};
use flux_inference::{
    AlertBus, BoundingBox, Detection, DetectionStore, Detector, Frame, FramePipe, PipeLauncher,
    PipeSpec, VideoHandle, VideoSource, WorkerSettings,
};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 16;

/// 模拟摄像头：按地址记录打开/关闭次数，指定地址永远打不开
#[derive(Default)]
pub struct MockVideoSource {
    dead: HashSet<String>,
    /// 每个句柄产生的帧数，`None` 表示无限
    frames_per_handle: Option<u64>,
    opens: Mutex<HashMap<String, usize>>,
    closes: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockVideoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead(mut self, address: &str) -> Self {
        self.dead.insert(address.to_string());
        self
    }

    pub fn with_frames_per_handle(mut self, frames: u64) -> Self {
        self.frames_per_handle = Some(frames);
        self
    }

    pub fn opens(&self, address: &str) -> usize {
        self.opens.lock().unwrap().get(address).copied().unwrap_or(0)
    }

    pub fn closes(&self, address: &str) -> usize {
        self.closes.lock().unwrap().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VideoSource for MockVideoSource {
    async fn open(&self, address: &str) -> Result<Box<dyn VideoHandle>, SourceError> {
        let previous = {
            let mut opens = self.opens.lock().unwrap();
            let count = opens.entry(address.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };

        // 有限帧数的源只能打开一次
        if self.dead.contains(address) || (self.frames_per_handle.is_some() && previous > 0) {
            return Err(SourceError::Open {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(Box::new(MockHandle {
            address: address.to_string(),
            remaining: self.frames_per_handle,
            closes: self.closes.clone(),
        }))
    }
}

struct MockHandle {
    address: String,
    remaining: Option<u64>,
    closes: Arc<Mutex<HashMap<String, usize>>>,
}

#[async_trait]
impl VideoHandle for MockHandle {
    async fn read_frame(&mut self) -> Result<Option<RawPicture>, SourceError> {
        match &mut self.remaining {
            Some(0) => return Ok(None),
            Some(n) => *n -= 1,
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
        Ok(Some(RawPicture {
            pixels: vec![0; Frame::byte_len(WIDTH, HEIGHT)],
            width: WIDTH,
            height: HEIGHT,
        }))
    }

    async fn close(&mut self) {
        *self
            .closes
            .lock()
            .unwrap()
            .entry(self.address.clone())
            .or_insert(0) += 1;
    }
}

/// 记录每次推理的帧序号
#[derive(Default)]
pub struct MockDetector {
    pub calls: Mutex<Vec<u64>>,
    pub detections: Vec<Detection>,
    pub fail: bool,
}

impl MockDetector {
    pub fn finding_person() -> Self {
        Self {
            detections: vec![Detection::new("person", 0.9, BoundingBox::new(0.5, 0.5, 0.5, 0.5))],
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

impl Detector for MockDetector {
    fn infer(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.calls.lock().unwrap().push(frame.sequence_number);
        if self.fail {
            anyhow::bail!("model not loaded");
        }
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
pub struct MockAlertBus {
    pub published: AtomicUsize,
    pub closed: AtomicUsize,
}

#[async_trait]
impl AlertBus for MockAlertBus {
    async fn publish(&self, _camera_id: &str, _detections: &[Detection]) -> bool {
        self.published.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 永远写入失败的存储
#[derive(Default)]
pub struct FailingStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl DetectionStore for FailingStore {
    async fn record(&self, _camera_id: &str, _frame_sequence: u64, _detection: &Detection) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// 记录写入帧的推流启动器
#[derive(Default)]
pub struct MockLauncher {
    pub launches: AtomicUsize,
    pub shutdowns: Arc<AtomicUsize>,
    pub frames: Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
}

impl MockLauncher {
    pub fn frames_for(&self, camera_id: &str) -> usize {
        self.frames
            .lock()
            .unwrap()
            .get(camera_id)
            .map(|f| f.len())
            .unwrap_or(0)
    }

    pub fn last_frame(&self, camera_id: &str) -> Option<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .get(camera_id)
            .and_then(|f| f.last().cloned())
    }
}

#[async_trait]
impl PipeLauncher for MockLauncher {
    async fn launch(&self, spec: &PipeSpec) -> Result<Box<dyn FramePipe>, SinkError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPipe {
            camera_id: spec.camera_id.clone(),
            shutdowns: self.shutdowns.clone(),
            frames: self.frames.clone(),
        }))
    }
}

struct MockPipe {
    camera_id: String,
    shutdowns: Arc<AtomicUsize>,
    frames: Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
}

#[async_trait]
impl FramePipe for MockPipe {
    async fn write_frame(&mut self, pixels: &[u8]) -> io::Result<()> {
        self.frames
            .lock()
            .unwrap()
            .entry(self.camera_id.clone())
            .or_default()
            .push(pixels.to_vec());
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fast_settings(frame_skip: u32) -> WorkerSettings {
    WorkerSettings {
        frame_skip,
        inference_interval: Duration::from_millis(1),
        reconnect_interval: Duration::from_millis(1),
        error_backoff: Duration::from_millis(1),
    }
}

/// 轮询直到条件成立，超时 panic
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
