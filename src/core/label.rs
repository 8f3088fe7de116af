//! 分类标签与概率向量

use serde::{Deserialize, Serialize};

/// 分类器输出的类别数
pub const NUM_CLASSES: usize = 3;

/// 分类器的三个类别，按类别下标排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceClass {
    Real,
    DeepfakeOg,
    DeepfakeLatest,
}

impl FaceClass {
    pub const ALL: [FaceClass; NUM_CLASSES] =
        [FaceClass::Real, FaceClass::DeepfakeOg, FaceClass::DeepfakeLatest];

    pub fn index(self) -> usize {
        match self {
            FaceClass::Real => 0,
            FaceClass::DeepfakeOg => 1,
            FaceClass::DeepfakeLatest => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaceClass::Real => "real",
            FaceClass::DeepfakeOg => "deepfake_og",
            FaceClass::DeepfakeLatest => "deepfake_latest",
        }
    }

    pub fn is_fake(self) -> bool {
        self != FaceClass::Real
    }
}

/// 单帧的预测标签：三个类别之一，或者没有可用人脸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLabel {
    Real,
    DeepfakeOg,
    DeepfakeLatest,
    NoFace,
}

impl FrameLabel {
    pub fn class(self) -> Option<FaceClass> {
        match self {
            FrameLabel::Real => Some(FaceClass::Real),
            FrameLabel::DeepfakeOg => Some(FaceClass::DeepfakeOg),
            FrameLabel::DeepfakeLatest => Some(FaceClass::DeepfakeLatest),
            FrameLabel::NoFace => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self.class() {
            Some(class) => class.as_str(),
            None => "no_face",
        }
    }

    pub fn is_no_face(self) -> bool {
        self == FrameLabel::NoFace
    }
}

impl From<FaceClass> for FrameLabel {
    fn from(class: FaceClass) -> Self {
        match class {
            FaceClass::Real => FrameLabel::Real,
            FaceClass::DeepfakeOg => FrameLabel::DeepfakeOg,
            FaceClass::DeepfakeLatest => FrameLabel::DeepfakeLatest,
        }
    }
}

/// 按类别下标排列的概率向量
///
/// 分类器产出的向量和为 1；无人脸帧使用全零占位。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassProbabilities(pub [f32; NUM_CLASSES]);

impl ClassProbabilities {
    pub fn zero() -> Self {
        Self([0.0; NUM_CLASSES])
    }

    /// 把模型原始输出整理为合法分布：截断到 [0,1] 后归一化
    pub fn from_raw(raw: &[f32]) -> Option<Self> {
        if raw.len() != NUM_CLASSES || raw.iter().any(|p| !p.is_finite()) {
            return None;
        }
        let mut probs = [0.0f32; NUM_CLASSES];
        for (dst, &src) in probs.iter_mut().zip(raw) {
            *dst = src.clamp(0.0, 1.0);
        }
        let sum: f32 = probs.iter().sum();
        if sum <= f32::EPSILON {
            return None;
        }
        for p in probs.iter_mut() {
            *p /= sum;
        }
        Some(Self(probs))
    }

    pub fn get(&self, class: FaceClass) -> f32 {
        self.0[class.index()]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&p| p == 0.0)
    }

    /// 取最大值所在类别；并列时取下标最小者
    pub fn argmax(&self) -> (FaceClass, f32) {
        let mut best = 0;
        for i in 1..NUM_CLASSES {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        (FaceClass::ALL[best], self.0[best])
    }

    /// 逐元素平均；空输入得到全零向量
    pub fn mean<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassProbabilities>,
    {
        let mut sum = [0.0f64; NUM_CLASSES];
        let mut count = 0usize;
        for item in items {
            for (acc, &p) in sum.iter_mut().zip(item.0.iter()) {
                *acc += p as f64;
            }
            count += 1;
        }
        if count == 0 {
            return Self::zero();
        }
        let mut out = [0.0f32; NUM_CLASSES];
        for (dst, acc) in out.iter_mut().zip(sum.iter()) {
            *dst = (acc / count as f64) as f32;
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_index_roundtrip() {
        for class in FaceClass::ALL {
            assert_eq!(FaceClass::from_index(class.index()), Some(class));
        }
        assert_eq!(FaceClass::from_index(3), None);
    }

    #[test]
    fn test_label_names_match_wire_format() {
        assert_eq!(FrameLabel::NoFace.as_str(), "no_face");
        assert_eq!(FrameLabel::from(FaceClass::DeepfakeOg).as_str(), "deepfake_og");
        let json = serde_json::to_string(&FrameLabel::DeepfakeLatest).unwrap();
        assert_eq!(json, "\"deepfake_latest\"");
    }

    #[test]
    fn test_argmax_tie_prefers_lowest_index() {
        let (class, conf) = ClassProbabilities::zero().argmax();
        assert_eq!(class, FaceClass::Real);
        assert_eq!(conf, 0.0);

        let (class, _) = ClassProbabilities([0.2, 0.4, 0.4]).argmax();
        assert_eq!(class, FaceClass::DeepfakeOg);
    }

    #[test]
    fn test_from_raw_normalizes() {
        let probs = ClassProbabilities::from_raw(&[2.0, 1.0, 1.0]).unwrap();
        assert!((probs.0.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs.0.iter().all(|p| (0.0..=1.0).contains(p)));

        assert!(ClassProbabilities::from_raw(&[0.5, 0.5]).is_none());
        assert!(ClassProbabilities::from_raw(&[f32::NAN, 0.5, 0.5]).is_none());
        assert!(ClassProbabilities::from_raw(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_mean_of_vectors() {
        let a = ClassProbabilities([1.0, 0.0, 0.0]);
        let b = ClassProbabilities([0.0, 1.0, 0.0]);
        let mean = ClassProbabilities::mean([&a, &b]);
        assert_eq!(mean.0, [0.5, 0.5, 0.0]);
        assert!(ClassProbabilities::mean(std::iter::empty::<&ClassProbabilities>()).is_zero());
    }
}
