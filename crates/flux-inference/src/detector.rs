use crate::frame::{Detection, Frame};

/// 目标检测能力：给定一帧图像，返回带置信度的矩形区域
///
/// 推理在阻塞线程池上执行；返回错误或 panic 均视为本帧无检测结果。
pub trait Detector: Send + Sync {
    fn infer(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// 不产生任何检测结果的检测器（未加载模型时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn infer(&self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_detector_returns_nothing() {
        let frame = Frame::new(vec![0; 12], 2, 2, 1);
        assert!(NullDetector.infer(&frame).unwrap().is_empty());
        assert_eq!(NullDetector.name(), "null");
    }
}
