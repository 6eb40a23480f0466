use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use simcorr::utils::{mean, pearson, variance};
use simcorr::{
    BinaryError, CorrelationStructure, Distribution, GenerationError, GeneratorOptions,
    MarginalError, MarginalSpec, Method, ParamSource, UnitId, UnitTable, add_correlated,
    build_correlation_matrix, empirical_correlation, generate_correlated,
};

fn standard_normal() -> MarginalSpec {
    MarginalSpec::new(Distribution::Normal, vec![0.0.into(), 1.0.into()])
}

fn long_table(n_ids: usize, seed: u64) -> UnitTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ids = Vec::new();
    let mut x = Vec::new();
    for id in 0..n_ids {
        let repeats: usize = rng.random_range(2..=5);
        for _ in 0..repeats {
            ids.push(UnitId::Int(i64::try_from(id).unwrap_or(i64::MAX)));
            x.push(rng.random::<f64>());
        }
    }
    UnitTable::new("id", ids).with_column("x", x)
}

fn zero_fraction(values: &[f64]) -> f64 {
    let indicators = values
        .iter()
        .map(|value| f64::from(u8::from(*value == 0.0)))
        .collect::<Vec<_>>();
    mean(&indicators)
}

#[test]
fn compound_symmetry_normals_reach_target_correlation() {
    let options = GeneratorOptions::default()
        .with_nvars(3)
        .with_structure(CorrelationStructure::CompoundSymmetry, 0.7)
        .with_seed(2024);
    let table = generate_correlated(100_000, &standard_normal(), &options)
        .expect("generation should succeed");

    let realized = empirical_correlation(&table, &["V1", "V2", "V3"]).expect("correlation");
    for i in 0..3 {
        for j in 0..i {
            assert!(
                (realized[(i, j)] - 0.7).abs() < 0.02,
                "pair ({i}, {j}) has correlation {}",
                realized[(i, j)]
            );
        }
    }
}

#[test]
fn poisson_marginal_keeps_its_moments() {
    let spec = MarginalSpec::new(Distribution::Poisson, vec![5.0.into()]);
    let options = GeneratorOptions::default()
        .with_nvars(2)
        .with_structure(CorrelationStructure::CompoundSymmetry, 0.4);
    let table = generate_correlated(50_000, &spec, &options).expect("generation should succeed");

    for name in ["V1", "V2"] {
        let values = table.column(name).expect("generated column");
        assert!((mean(values) - 5.0).abs() < 0.1);
        assert!((variance(values) - 5.0).abs() < 0.5);
    }
}

#[test]
fn copula_binary_marginal_keeps_its_probability() {
    let spec = MarginalSpec::new(Distribution::Binary, vec![0.3.into()]);
    let options = GeneratorOptions::default()
        .with_nvars(2)
        .with_structure(CorrelationStructure::CompoundSymmetry, 0.4)
        .with_seed(7);
    let table = generate_correlated(20_000, &spec, &options).expect("generation should succeed");

    let v1 = table.column("V1").expect("V1");
    let v2 = table.column("V2").expect("V2");
    for values in [v1, v2] {
        assert!(values.iter().all(|value| *value == 0.0 || *value == 1.0));
        assert!((mean(values) - 0.3).abs() < 0.02);
    }
    // Thresholding attenuates the latent correlation.
    let phi = pearson(v1, v2);
    assert!(phi > 0.15 && phi < 0.4, "phi = {phi}");
}

#[test]
fn sparse_counts_keep_their_mass_at_zero() {
    let options = GeneratorOptions::default()
        .with_nvars(2)
        .with_structure(CorrelationStructure::Ar1, 0.5)
        .with_seed(13);

    let poisson = MarginalSpec::new(Distribution::Poisson, vec![0.2.into()]);
    let table = generate_correlated(30_000, &poisson, &options).expect("poisson");
    let values = table.column("V1").expect("V1");
    // P(X = 0) = exp(-0.2)
    assert!((zero_fraction(values) - (-0.2_f64).exp()).abs() < 0.015);
    assert!((mean(values) - 0.2).abs() < 0.015);

    let negative_binomial =
        MarginalSpec::new(Distribution::NegativeBinomial, vec![0.5.into(), 1.0.into()]);
    let table = generate_correlated(30_000, &negative_binomial, &options).expect("nb");
    let values = table.column("V2").expect("V2");
    // size 1, success probability 2/3
    assert!((zero_fraction(values) - 2.0 / 3.0).abs() < 0.015);
    assert!((mean(values) - 0.5).abs() < 0.03);
}

#[test]
fn emrich_piedmonte_matches_probabilities_and_correlation() {
    let spec = MarginalSpec::new(Distribution::Binary, vec![0.3.into()]);
    let options = GeneratorOptions::default()
        .with_nvars(2)
        .with_structure(CorrelationStructure::CompoundSymmetry, 0.2)
        .with_method(Method::EmrichPiedmonte)
        .with_seed(99);
    let table = generate_correlated(20_000, &spec, &options).expect("generation should succeed");

    let v1 = table.column("V1").expect("V1");
    let v2 = table.column("V2").expect("V2");
    assert!((mean(v1) - 0.3).abs() < 0.02);
    assert!((mean(v2) - 0.3).abs() < 0.02);
    assert!((pearson(v1, v2) - 0.2).abs() < 0.03);
}

#[test]
fn emrich_piedmonte_rejects_unattainable_correlation() {
    let matrix = build_correlation_matrix(2, CorrelationStructure::CompoundSymmetry, 0.99)
        .expect("valid matrix");
    let spec = MarginalSpec::new(Distribution::Binary, vec![ParamSource::PerVariable(vec![0.1, 0.9])]);
    let options = GeneratorOptions::default()
        .with_matrix(matrix)
        .with_method(Method::EmrichPiedmonte);

    let err = generate_correlated(100, &spec, &options).expect_err("infeasible target should fail");
    assert!(matches!(
        err,
        GenerationError::Binary(BinaryError::InfeasibleCorrelation { i: 1, j: 0, .. })
    ));
}

#[test]
fn wide_table_gains_named_columns() {
    let table = UnitTable::with_sequential_ids("id", 200).with_column("age", vec![40.0; 200]);
    let options = GeneratorOptions::default()
        .with_nvars(3)
        .with_structure(CorrelationStructure::Ar1, 0.5);

    let defaulted = add_correlated(table.clone(), &standard_normal(), &options)
        .expect("generation should succeed");
    assert_eq!(defaulted.nrows(), 200);
    assert_eq!(
        defaulted.column_names().collect::<Vec<_>>(),
        vec!["age", "V1", "V2", "V3"]
    );

    let named = add_correlated(
        table,
        &standard_normal(),
        &options.with_names(["sbp", "dbp", "hr"]),
    )
    .expect("generation should succeed");
    assert_eq!(
        named.column_names().collect::<Vec<_>>(),
        vec!["age", "sbp", "dbp", "hr"]
    );
}

#[test]
fn long_table_gains_one_column_in_row_order() {
    let table = long_table(500, 8);
    let original_x = table.column("x").expect("x").to_vec();
    let options = GeneratorOptions::default().with_structure(CorrelationStructure::Ar1, 0.6);

    let generated = add_correlated(table.clone(), &standard_normal(), &options)
        .expect("generation should succeed");
    assert_eq!(generated.nrows(), table.nrows());
    assert_eq!(generated.ids(), table.ids());
    assert_eq!(generated.column("x"), Some(original_x.as_slice()));
    assert_eq!(generated.column_names().collect::<Vec<_>>(), vec!["x", "X"]);
}

#[test]
fn gamma_with_one_parameter_fails_before_sampling() {
    let spec = MarginalSpec::new(Distribution::Gamma, vec![2.0.into()]);
    let options = GeneratorOptions::default().with_nvars(2);
    let err = generate_correlated(10, &spec, &options).expect_err("missing dispersion should fail");
    assert_eq!(
        err,
        GenerationError::Marginal(MarginalError::ParameterCountMismatch {
            distribution: Distribution::Gamma,
            expected: 2,
            found: 1,
        })
    );
}

#[test]
fn same_seed_gives_identical_tables() {
    let spec = MarginalSpec::new(Distribution::NegativeBinomial, vec![3.0.into(), 0.5.into()]);
    let options = GeneratorOptions::default()
        .with_structure(CorrelationStructure::CompoundSymmetry, 0.3)
        .with_seed(17);

    let first = add_correlated(long_table(200, 1), &spec, &options).expect("first run");
    let second = add_correlated(long_table(200, 1), &spec, &options).expect("second run");
    assert_eq!(first, second);

    let reseeded = add_correlated(long_table(200, 1), &spec, &options.with_seed(18))
        .expect("reseeded run");
    assert_ne!(first.column("X"), reseeded.column("X"));
}
