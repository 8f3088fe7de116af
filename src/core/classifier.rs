use crate::core::error::DetectResult;
use crate::core::features::BetaDescriptor;
use crate::core::label::ClassProbabilities;

/// 人脸分类器：63 维描述子 -> 三类概率分布
///
/// 实现必须可以在多个请求之间共享；不可重入的运行时需要自行加锁。
pub trait FaceClassifier: Send + Sync {
    fn classify(&self, descriptor: &BetaDescriptor) -> DetectResult<ClassProbabilities>;
}

pub struct MockClassifier {
    // 根据描述子决定输出
    pattern: Box<dyn Fn(&BetaDescriptor) -> ClassProbabilities + Send + Sync>,
}

impl MockClassifier {
    /// 对任何输入都返回同一个分布
    pub fn fixed(probabilities: [f32; 3]) -> Self {
        let probs = ClassProbabilities(probabilities);
        Self::with_pattern(move |_| probs)
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&BetaDescriptor) -> ClassProbabilities + Send + Sync + 'static,
    {
        Self {
            pattern: Box::new(pattern),
        }
    }
}

impl FaceClassifier for MockClassifier {
    fn classify(&self, descriptor: &BetaDescriptor) -> DetectResult<ClassProbabilities> {
        Ok((self.pattern)(descriptor))
    }
}
