// FakeQuantize Tests — quantization sites, calibration and the fake-quant
// invariants checked end to end through the CPU backend

use approx::assert_relative_eq;
use fakeq::{
    CpuBackend, CpuDevice, CpuTensor, DType, Error, FakeQuantConfig, FakeQuantize,
    PerChannelParams, QuantParams, RoundingMode, Shape, SiteParams,
};
use proptest::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn t(data: &[f64], shape: impl Into<Shape>) -> CpuTensor {
    CpuTensor::from_f64_slice(data, shape, DType::F32, &CpuDevice).unwrap()
}

fn site(config: FakeQuantConfig) -> FakeQuantize<CpuBackend> {
    FakeQuantize::new(config).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────
// Forward / backward through a site
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_uint8_site_scenarios() {
    init_logging();
    let mut fq = site(FakeQuantConfig::uint8());
    fq.set_params(QuantParams::new(0.5, 10, 0, 255)).unwrap();

    let x = t(&[3.2, 200.0], 2);
    let y = fq.forward(&x).unwrap();
    assert_eq!(y.to_f64_vec().unwrap(), vec![3.0, 122.5]);

    let dy = t(&[1.0, 1.0], 2);
    let dx = fq.backward(&x, &dy).unwrap();
    assert_eq!(dx.to_f64_vec().unwrap(), vec![1.0, 0.0]);
}

#[test]
fn test_disabled_site_passes_through() {
    let mut fq = site(FakeQuantConfig::int8());
    fq.disable();
    assert!(!fq.is_enabled());

    let x = t(&[0.3, 900.0], 2);
    let dy = t(&[2.0, 2.0], 2);
    let y = fq.forward(&x).unwrap();
    assert!(y.shares_storage(&x));
    assert_eq!(y.to_f64_vec().unwrap(), x.to_f64_vec().unwrap());
    assert_eq!(fq.backward(&x, &dy).unwrap().to_f64_vec().unwrap(), vec![2.0, 2.0]);

    fq.enable();
    assert_eq!(fq.forward(&x).unwrap().to_f64_vec().unwrap(), vec![0.0, 127.0]);
    assert_eq!(fq.backward(&x, &dy).unwrap().to_f64_vec().unwrap(), vec![2.0, 0.0]);
}

#[test]
fn test_config_enabled_flag() {
    let fq = site(FakeQuantConfig::int8().with_enabled(false));
    assert!(!fq.is_enabled());
}

#[test]
fn test_site_uses_configured_rounding() {
    let x = t(&[2.5, -2.5], 2);
    let expected = [
        (RoundingMode::NearestEven, vec![2.0, -2.0]),
        (RoundingMode::HalfAwayFromZero, vec![3.0, -3.0]),
        (RoundingMode::Floor, vec![2.0, -3.0]),
        (RoundingMode::Ceil, vec![3.0, -2.0]),
        (RoundingMode::Truncate, vec![2.0, -2.0]),
    ];
    for (mode, want) in expected {
        let fq = site(FakeQuantConfig::int8().with_rounding(mode));
        assert_eq!(fq.rounding(), mode);
        assert_eq!(fq.forward(&x).unwrap().to_f64_vec().unwrap(), want, "{mode}");
    }
}

#[test]
fn test_set_params_checks() {
    let mut fq = site(FakeQuantConfig::int8());
    assert!(matches!(
        fq.set_params(QuantParams::new(0.0, 0, -128, 127)),
        Err(Error::InvalidScale { .. })
    ));
    assert!(fq
        .set_per_channel_params(PerChannelParams::new(vec![1.0], vec![0], 0, -128, 127))
        .is_err());

    let mut fq = site(FakeQuantConfig::int8().per_channel(1));
    assert!(fq.set_params(QuantParams::new(1.0, 0, -128, 127)).is_err());
    assert!(fq
        .set_per_channel_params(PerChannelParams::new(vec![1.0], vec![0], 0, -128, 127))
        .is_err());
    fq.set_per_channel_params(PerChannelParams::new(vec![1.0, 2.0], vec![0, 0], 1, -128, 127))
        .unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let config = FakeQuantConfig {
        quant_min: 5,
        quant_max: 4,
        ..FakeQuantConfig::default()
    };
    assert!(matches!(
        FakeQuantize::<CpuBackend>::new(config),
        Err(Error::InvalidQuantRange { .. })
    ));
}

// ─────────────────────────────────────────────────────────────────────────
// Calibration
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_calibrate_per_tensor() {
    init_logging();
    let mut fq = site(FakeQuantConfig::uint8());
    let x = t(&[-1.0, 0.0, 1.7, 3.0], 4);
    fq.calibrate(&x).unwrap();

    let SiteParams::PerTensor(p) = fq.params() else {
        panic!("expected per-tensor parameters");
    };
    assert_relative_eq!(p.scale, 4.0 / 255.0, max_relative = 1e-6);
    assert_eq!(p.zero_point, 64);

    // The observed extremes survive quantization to within half a step.
    let y = fq.forward(&x).unwrap().to_f64_vec().unwrap();
    for (a, b) in y.iter().zip(x.to_f64_vec().unwrap()) {
        assert!((a - b).abs() <= p.scale as f64 / 2.0 + 1e-6, "{a} vs {b}");
    }
}

#[test]
fn test_calibrate_ignores_non_finite() {
    init_logging();
    let mut fq = site(FakeQuantConfig::int8());
    fq.calibrate(&t(&[f64::NAN, f64::INFINITY], 2)).unwrap();
    assert_eq!(fq.params(), &SiteParams::PerTensor(QuantParams::new(1.0, 0, -128, 127)));

    fq.calibrate(&t(&[f64::NAN, -2.0, 2.0], 3)).unwrap();
    let SiteParams::PerTensor(p) = fq.params() else {
        panic!("expected per-tensor parameters");
    };
    assert_relative_eq!(p.scale, 4.0 / 255.0, max_relative = 1e-6);
}

#[test]
fn test_calibrate_full_i64_range() {
    let config = FakeQuantConfig::from_json_str(
        r#"{ "quant_min": -9223372036854775808, "quant_max": 9223372036854775807 }"#,
    )
    .unwrap();
    let mut fq = site(config);
    fq.calibrate(&t(&[-1.0, 1.0], 2)).unwrap();
    let SiteParams::PerTensor(p) = fq.params() else {
        panic!("expected per-tensor parameters");
    };
    assert!(p.scale > 0.0 && p.scale.is_finite());
    assert_eq!((p.quant_min, p.quant_max), (i64::MIN, i64::MAX));
}

#[test]
fn test_calibrate_per_channel() {
    init_logging();
    let mut fq = site(FakeQuantConfig::uint8().per_channel(0));
    let x = t(&[0.0, 1.0, 0.0, 10.0], (2, 2));

    // Uncalibrated per-channel sites have no channels yet.
    assert!(matches!(
        fq.forward(&x),
        Err(Error::ChannelCountMismatch { .. })
    ));

    fq.calibrate(&x).unwrap();
    let SiteParams::PerChannel(p) = fq.params() else {
        panic!("expected per-channel parameters");
    };
    assert_eq!(p.num_channels(), 2);
    assert_relative_eq!(p.scales[0], 1.0 / 255.0, max_relative = 1e-6);
    assert_relative_eq!(p.scales[1], 10.0 / 255.0, max_relative = 1e-6);
    assert_eq!(p.zero_points, vec![0, 0]);

    let y = fq.forward(&x).unwrap().to_f64_vec().unwrap();
    assert_relative_eq!(y[1], 1.0, max_relative = 1e-6);
    assert_relative_eq!(y[3], 10.0, max_relative = 1e-6);

    let mut bad = site(FakeQuantConfig::int8().per_channel(3));
    assert!(matches!(
        bad.calibrate(&x),
        Err(Error::DimOutOfRange { dim: 3, rank: 2 })
    ));
}

// ─────────────────────────────────────────────────────────────────────────
// Config loading
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_site_from_json_config() {
    let config = FakeQuantConfig::from_json_str(
        r#"{ "quant_min": 0, "quant_max": 15, "rounding": "floor",
             "granularity": { "per_channel": { "axis": 1 } } }"#,
    )
    .unwrap();
    let fq = site(config);
    assert_eq!(fq.rounding(), RoundingMode::Floor);
    assert!(matches!(fq.params(), SiteParams::PerChannel(p) if p.axis == 1));
}

// ─────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────

fn params() -> impl Strategy<Value = QuantParams> {
    (0.01f32..4.0, -20i64..20, -128i64..-1, 1i64..128)
        .prop_map(|(scale, zp, qmin, qmax)| QuantParams::new(scale, zp, qmin, qmax))
}

fn mode() -> impl Strategy<Value = RoundingMode> {
    prop::sample::select(RoundingMode::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Quantizing an already fake-quantized tensor changes nothing. With a
    /// power-of-two scale the grid points are exact, so this holds for every
    /// rounding mode.
    #[test]
    fn prop_idempotent(
        data in prop::collection::vec(-500.0f64..500.0, 1..64),
        p in params(),
        exp in -6i32..4,
        m in mode(),
    ) {
        let p = p.with_scale(2f32.powi(exp));
        let x = CpuTensor::from_f64_slice(&data, data.len(), DType::F64, &CpuDevice).unwrap();
        let once = x.fake_quantize(&p, m).unwrap();
        let twice = once.fake_quantize(&p, m).unwrap();
        prop_assert_eq!(once.to_f64_vec().unwrap(), twice.to_f64_vec().unwrap());
    }

    /// Round-to-nearest modes land back on the same level for any scale.
    #[test]
    fn prop_idempotent_nearest(
        data in prop::collection::vec(-500.0f64..500.0, 1..64),
        p in params(),
        m in prop::sample::select(vec![RoundingMode::NearestEven, RoundingMode::HalfAwayFromZero]),
    ) {
        let x = t(&data, data.len());
        let once = x.fake_quantize(&p, m).unwrap();
        let twice = once.fake_quantize(&p, m).unwrap();
        prop_assert_eq!(once.to_f64_vec().unwrap(), twice.to_f64_vec().unwrap());
    }

    /// Outputs stay inside the dequantized range.
    #[test]
    fn prop_output_in_range(
        data in prop::collection::vec(-1.0e4f64..1.0e4, 1..64),
        p in params(),
        m in mode(),
    ) {
        let x = t(&data, data.len());
        let (lo, hi) = p.dequantized_range();
        let (lo, hi) = (lo as f32 as f64, hi as f32 as f64);
        for y in x.fake_quantize(&p, m).unwrap().to_f64_vec().unwrap() {
            prop_assert!(y >= lo && y <= hi, "{} outside [{}, {}]", y, lo, hi);
        }
    }

    /// A zero gradient marks exactly the elements that were clamped to an
    /// end of the range.
    #[test]
    fn prop_gradient_zero_only_when_saturated(
        data in prop::collection::vec(-1.0e3f64..1.0e3, 1..64),
        p in params(),
        m in mode(),
    ) {
        let x = t(&data, data.len());
        let ones = t(&vec![1.0; data.len()], data.len());
        let y = x.fake_quantize(&p, m).unwrap().to_f64_vec().unwrap();
        let g = x.fake_quantize_backward(&ones, &p, m).unwrap().to_f64_vec().unwrap();
        let (lo, hi) = p.dequantized_range();
        let (lo, hi) = (lo as f32 as f64, hi as f32 as f64);
        for (&yi, &gi) in y.iter().zip(&g) {
            prop_assert!(gi == 0.0 || gi == 1.0);
            if gi == 0.0 {
                prop_assert!(yi == lo || yi == hi, "gated element {} not saturated", yi);
            }
        }
    }

    /// Strided views give the same values as their dense copies.
    #[test]
    fn prop_transposed_equals_dense(
        data in prop::collection::vec(-100.0f64..100.0, 12),
        p in params(),
        m in mode(),
    ) {
        let x = t(&data, (3, 4)).transpose(0, 1).unwrap();
        let strided = x.fake_quantize(&p, m).unwrap().to_f64_vec().unwrap();
        let dense = x.contiguous().unwrap().fake_quantize(&p, m).unwrap().to_f64_vec().unwrap();
        prop_assert_eq!(strided, dense);
    }
}
