//! Estimator properties on small hand-built and seeded synthetic panels.
//!
//! - DR residual and means-difference forms agree, at any outcome scale
//! - Hajek weights average to one in each arm
//! - With treatment independent of covariates, plain / OR / IPTW / DR coincide
//! - OR with no untreated counties is an estimation error
//! - A constant covariate is dropped deterministically
//! - Two-county example gives ATT 0.3

use approx::assert_relative_eq;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal as RandNormal};

use tva_core::{Error, PeriodColumns, WeightNormalization};
use tva_inference::econometrics::{
    DiffSpec, FirstDiffTable, IptwWeights, dr_att_means_form, dr_att_residual_form, means_scale,
};
use tva_inference::{
    PanelFrame, doubly_robust, first_difference, first_difference_did, iptw, outcome_regression,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn table(treated: Vec<u8>, x: Vec<Vec<f64>>, dy: Vec<f64>, names: &[&str]) -> FirstDiffTable {
    let county = (0..dy.len()).map(|i| format!("{i:05}")).collect();
    let names = names.iter().map(|s| s.to_string()).collect();
    FirstDiffTable::from_parts(county, treated, names, x, dy).unwrap()
}

/// Two covariates, treatment drawn independently of them, effect `att`.
fn independent_assignment(n: usize, att: f64, seed: u64) -> FirstDiffTable {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let eps = RandNormal::new(0.0, 0.05).unwrap();
    let mut x = Vec::with_capacity(n);
    let mut d = Vec::with_capacity(n);
    let mut dy = Vec::with_capacity(n);
    for _ in 0..n {
        let share20: f64 = rng.random_range(0.2..0.8);
        let share30: f64 = (share20 + rng.random_range(-0.05..0.05)).clamp(0.0, 1.0);
        let di = u8::from(rng.random_bool(0.3));
        x.push(vec![share20, share30]);
        d.push(di);
        dy.push(-0.1 - 0.6 * share20 + att * f64::from(di) + eps.sample(&mut rng));
    }
    table(d, x, dy, &["agriculture_share_1920", "agriculture_share_1930"])
}

// ---------------------------------------------------------------------------
// Algebraic properties
// ---------------------------------------------------------------------------

fn weighted_sample() -> impl Strategy<Value = (Vec<u8>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    (4usize..60).prop_flat_map(|n| {
        (
            proptest::collection::vec(0u8..=1, n),
            proptest::collection::vec(0.01f64..0.99, n),
            proptest::collection::vec(-5.0f64..5.0, n),
            proptest::collection::vec(-5.0f64..5.0, n),
        )
    })
}

proptest! {
    #[test]
    fn dr_forms_agree((d, p, dy, m) in weighted_sample()) {
        let n1 = d.iter().filter(|&&v| v == 1).count();
        prop_assume!(n1 > 0 && n1 < d.len());
        let w = IptwWeights::from_propensity(&d, &p).unwrap();
        for norm in [WeightNormalization::Hajek, WeightNormalization::HorvitzThompson] {
            let (w1, w0) = w.arms(norm);
            let a = dr_att_residual_form(w1, w0, &dy, &m);
            let b = dr_att_means_form(w1, w0, &dy, &m);
            let scale = a.abs().max(b.abs()).max(1.0);
            prop_assert!((a - b).abs() <= 1e-9 * scale, "{} vs {}", a, b);
        }
    }

    #[test]
    fn dr_succeeds_at_large_outcome_scale(
        seed in any::<u64>(),
        n in 40usize..120,
        offset in 0.0f64..1e9,
        slope in -3e8f64..3e8,
    ) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let x: Vec<Vec<f64>> = (0..n).map(|_| vec![rng.random_range(0.0..1.0)]).collect();
        let d: Vec<u8> = (0..n).map(|_| u8::from(rng.random_bool(0.4))).collect();
        let n1 = d.iter().filter(|&&v| v == 1).count();
        prop_assume!(n1 >= 5 && n - n1 >= 5);
        let dy: Vec<f64> = x
            .iter()
            .zip(&d)
            .map(|(r, &di)| offset + slope * r[0] + 0.3 * f64::from(di) + rng.random_range(-0.1..0.1))
            .collect();
        let t = table(d, x, dy, &["share"]);

        for norm in [WeightNormalization::Hajek, WeightNormalization::HorvitzThompson] {
            let res = doubly_robust(&t, 0.99, norm);
            prop_assert!(res.is_ok(), "{:?}", res.err());
            let res = res.unwrap();
            let (w1, w0) = res.iptw.weights.arms(norm);
            let scale = means_scale(w1, w0, &t.dy, &res.outcome_regression.predictions);
            prop_assert!(
                (res.att - res.att_means_form).abs() <= 1e-9 * scale,
                "{} vs {} (scale {})", res.att, res.att_means_form, scale
            );
        }
    }

    #[test]
    fn hajek_weights_average_to_one((d, p, _dy, _m) in weighted_sample()) {
        let n1 = d.iter().filter(|&&v| v == 1).count();
        prop_assume!(n1 > 0 && n1 < d.len());
        let w = IptwWeights::from_propensity(&d, &p).unwrap();
        let n = d.len() as f64;
        let m1 = w.w1_hajek.iter().sum::<f64>() / n;
        let m0 = w.w0_hajek.iter().sum::<f64>() / n;
        prop_assert!((m1 - 1.0).abs() < 1e-12, "mean(w1n) = {}", m1);
        prop_assert!((m0 - 1.0).abs() < 1e-12, "mean(w0n) = {}", m0);
    }
}

// ---------------------------------------------------------------------------
// Estimator agreement and degeneracies
// ---------------------------------------------------------------------------

#[test]
fn estimators_coincide_under_random_assignment() {
    let t = independent_assignment(6000, 0.15, 2024);
    let plain = first_difference_did(&t, 0.95).unwrap().estimate.att;
    let or = outcome_regression(&t).unwrap().att;
    let ipw = iptw(&t, 0.99, WeightNormalization::Hajek).unwrap();
    let dr = doubly_robust(&t, 0.99, WeightNormalization::Hajek).unwrap();

    for (name, att) in [
        ("plain", plain),
        ("or", or),
        ("iptw_hajek", ipw.att_hajek),
        ("iptw_ht", ipw.att_horvitz_thompson),
        ("dr", dr.att),
    ] {
        assert!((att - 0.15).abs() < 0.02, "{name}: {att}");
    }
    assert!((or - ipw.att_hajek).abs() < 0.01);
    assert!(ipw.overlap_warning.is_none());
}

#[test]
fn outcome_regression_without_untreated_is_error() {
    let t = table(vec![1, 1, 1, 1], vec![vec![0.3]; 4], vec![0.1, 0.2, 0.3, 0.4], &["x"]);
    match outcome_regression(&t) {
        Err(Error::Estimation(msg)) => {
            assert!(msg.contains("0 untreated"), "{msg}");
            assert!(msg.contains("2 parameters"), "{msg}");
        }
        other => panic!("expected Estimation error, got {other:?}"),
    }
}

#[test]
fn constant_covariate_is_dropped_deterministically() {
    let base = independent_assignment(800, 0.2, 7);
    let x_const: Vec<Vec<f64>> = base.x.iter().map(|r| vec![r[0], 0.42]).collect();
    let with_const =
        table(base.treated.clone(), x_const, base.dy.clone(), &["share", "constant"]);
    let x_only: Vec<Vec<f64>> = base.x.iter().map(|r| vec![r[0]]).collect();
    let without = table(base.treated.clone(), x_only, base.dy.clone(), &["share"]);

    let a = doubly_robust(&with_const, 0.99, WeightNormalization::Hajek).unwrap();
    let b = doubly_robust(&without, 0.99, WeightNormalization::Hajek).unwrap();
    assert_eq!(a.outcome_regression.dropped_columns, vec![1]);
    assert_eq!(a.iptw.dropped_columns, vec![1]);
    assert_relative_eq!(a.att, b.att, max_relative = 1e-9);

    let again = doubly_robust(&with_const, 0.99, WeightNormalization::Hajek).unwrap();
    assert_eq!(a.att.to_bits(), again.att.to_bits());
}

#[test]
fn two_county_example() {
    let frame = PanelFrame::new(
        vec!["A".into(), "A".into(), "B".into(), "B".into()],
        vec![1940, 1960, 1940, 1960],
        vec![1, 1, 0, 0],
    )
    .unwrap()
    .with_column("ln_agriculture", vec![1.0, 1.5, 2.0, 2.2])
    .unwrap();
    let spec = DiffSpec {
        outcome: "ln_agriculture",
        covariates: &[],
        periods: PeriodColumns { pre: 1940, post: 1960 },
        cluster_column: None,
    };
    let diff = first_difference(&frame, &spec).unwrap();
    let res = first_difference_did(&diff.table, 0.95).unwrap();
    assert_relative_eq!(res.estimate.att, 0.3, epsilon = 1e-12);
}
