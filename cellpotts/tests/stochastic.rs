use cellpotts::prelude::*;

fn wiener_store(n_cells: CellId) -> SymbolStore {
    let mut store = SymbolStore::new();
    store.add_cell_property("w", 0.0);
    for cell in 1..=n_cells {
        store.add_cell(cell);
    }
    store
}

fn wiener_description(method: SolverMethod, time_step: f64) -> SystemDescription {
    SystemDescription::new(SystemKind::Continuous, SolverSpec::new(method, time_step))
        .with(Declaration::DiffEqn {
            symbol: "w".into(),
            expression: "rand_norm(0, 1)".into(),
        })
        .with_seed(7)
}

#[test]
fn noise_is_scaled_with_the_time_step() {
    assert_eq!(
        inject_noise_scaling("-w + 2 * rand_norm(0, s)").unwrap().as_deref(),
        Some("-w + 2 * rand_norm(0, s, _noise_scaling)")
    );
    assert_eq!(inject_noise_scaling("-w").unwrap(), None);
}

#[test]
fn euler_maruyama_produces_wiener_process() {
    // After T = 1 every cell holds one sample of a standard normal distribution
    let n_cells = 400;
    let dt = 0.01;
    let mut store = wiener_store(n_cells);
    let system = System::new(&wiener_description(SolverMethod::Euler, dt), &store).unwrap();
    assert_eq!(system.target_granularity(), Granularity::Cell);
    for step in 0..100 {
        store.set_time(step as f64 * dt);
        system.execute_time_step(&mut store).unwrap();
    }
    let samples: Vec<f64> = (1..=n_cells)
        .map(|cell| store.value("w", &SymbolFocus::Cell(cell)).unwrap())
        .collect();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance =
        samples.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    assert!(mean.abs() < 0.2, "mean {mean}");
    assert!((variance - 1.0).abs() < 0.25, "variance {variance}");
}

#[test]
fn noise_requires_euler() {
    let store = wiener_store(1);
    for method in [
        SolverMethod::Heun,
        SolverMethod::RungeKutta4,
        SolverMethod::CashKarp,
    ] {
        let result = System::new(&wiener_description(method, 0.01), &store);
        assert!(result.is_err(), "{} accepted noise", method.name());
    }
}

#[test]
fn other_distributions_are_rejected_in_rates() {
    let store = wiener_store(1);
    let description =
        SystemDescription::new(SystemKind::Continuous, SolverSpec::new(SolverMethod::Euler, 0.1))
            .with(Declaration::DiffEqn {
                symbol: "w".into(),
                expression: "rand_uni(0, 1)".into(),
            });
    assert!(System::new(&description, &store).is_err());

    // Rules may draw from every distribution
    let description = SystemDescription::new(SystemKind::Discrete, SolverSpec::default()).with(
        Declaration::Rule {
            symbol: "w".into(),
            expression: "rand_uni(2, 3) + rand_bool()".into(),
        },
    );
    let mut store = store;
    let system = System::new(&description, &store).unwrap();
    system.execute_time_step(&mut store).unwrap();
    let w = store.value("w", &SymbolFocus::Cell(1)).unwrap();
    assert!((2.0..4.0).contains(&w));
}

#[test]
fn seeded_systems_are_reproducible() {
    let run = || {
        let mut store = wiener_store(3);
        let system = System::new(&wiener_description(SolverMethod::Euler, 0.1), &store).unwrap();
        for _ in 0..5 {
            system.execute_time_step(&mut store).unwrap();
        }
        (1..=3)
            .map(|cell| store.value("w", &SymbolFocus::Cell(cell)).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn parallel_noise_does_not_depend_on_thread_count() {
    let n_cells = 3 * PARALLEL_THRESHOLD as CellId;
    let run = |n_threads: usize| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .unwrap();
        pool.install(|| {
            let mut store = wiener_store(n_cells);
            let system =
                System::new(&wiener_description(SolverMethod::Euler, 0.1), &store).unwrap();
            for _ in 0..5 {
                system.execute_time_step(&mut store).unwrap();
            }
            (1..=n_cells)
                .map(|cell| store.value("w", &SymbolFocus::Cell(cell)).unwrap())
                .collect::<Vec<_>>()
        })
    };
    let single = run(1);
    assert_eq!(single, run(4));
    assert_eq!(single, run(4));
    // Cells draw different numbers
    assert!(single.windows(2).all(|w| w[0] != w[1]));
}
