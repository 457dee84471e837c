use cellpotts::prelude::*;

const DECAY_RATE: f64 = 1.5;
const T_END: f64 = 1.0;

fn decay_system(method: SolverMethod, time_step: f64, epsilon: f64) -> (SymbolStore, System) {
    let mut store = SymbolStore::new();
    store.add_constant("k", DECAY_RATE);
    store.add_variable("y", 1.0);
    let mut solver = SolverSpec::new(method, time_step);
    solver.epsilon = epsilon;
    let description = SystemDescription::new(SystemKind::Continuous, solver).with(
        Declaration::DiffEqn {
            symbol: "y".into(),
            expression: "-k * y".into(),
        },
    );
    let system = System::new(&description, &store).unwrap();
    (store, system)
}

fn global_error(method: SolverMethod, n_steps: usize) -> f64 {
    let dt = T_END / n_steps as f64;
    let (mut store, system) = decay_system(method, dt, 1e-4);
    for step in 0..n_steps {
        store.set_time(step as f64 * dt);
        system.execute_time_step(&mut store).unwrap();
    }
    let y = store.value("y", &SymbolFocus::Global).unwrap();
    (y - (-DECAY_RATE * T_END).exp()).abs()
}

fn observed_order(method: SolverMethod) -> f64 {
    let coarse = global_error(method, 20);
    let fine = global_error(method, 40);
    (coarse / fine).log2()
}

#[test]
fn euler_is_first_order() {
    let order = observed_order(SolverMethod::Euler);
    assert!((order - 1.0).abs() < 0.15, "observed order {order}");
}

#[test]
fn heun_is_second_order() {
    let order = observed_order(SolverMethod::Heun);
    assert!((order - 2.0).abs() < 0.2, "observed order {order}");
}

#[test]
fn runge_kutta_is_fourth_order() {
    let order = observed_order(SolverMethod::RungeKutta4);
    assert!((order - 4.0).abs() < 0.3, "observed order {order}");
    let order = observed_order(SolverMethod::RungeKutta38);
    assert!((order - 4.0).abs() < 0.3, "observed order {order}");
}

#[test]
fn adaptive_methods_respect_tolerance() {
    for method in [
        SolverMethod::BogackiShampine,
        SolverMethod::CashKarp,
        SolverMethod::DormandPrince,
    ] {
        // One call integrates the whole interval with internal sub-steps
        let (mut store, system) = decay_system(method, T_END, 1e-6);
        assert!(system.adaptive());
        system.execute_time_step(&mut store).unwrap();
        let y = store.value("y", &SymbolFocus::Global).unwrap();
        let error = (y - (-DECAY_RATE * T_END).exp()).abs();
        assert!(error < 1e-5, "{}: error {error}", method.name());
    }
}

#[test]
fn adaptive_steps_are_reused() {
    let (mut store, system) = decay_system(SolverMethod::CashKarp, 0.25, 1e-8);
    for step in 0..4 {
        store.set_time(step as f64 * 0.25);
        system.execute_time_step(&mut store).unwrap();
    }
    let y = store.value("y", &SymbolFocus::Global).unwrap();
    approx::assert_abs_diff_eq!(y, (-DECAY_RATE).exp(), epsilon = 1e-7);
}

#[test]
fn time_dependent_rates_see_stage_times() {
    // dy/dt = t integrates to t^2 / 2 exactly for every method of order two and above
    for method in [
        SolverMethod::Heun,
        SolverMethod::RungeKutta4,
        SolverMethod::BogackiShampine,
        SolverMethod::DormandPrince,
    ] {
        let mut store = SymbolStore::new();
        store.add_variable("y", 0.0);
        let description =
            SystemDescription::new(SystemKind::Continuous, SolverSpec::new(method, 0.5)).with(
                Declaration::DiffEqn {
                    symbol: "y".into(),
                    expression: "time".into(),
                },
            );
        let system = System::new(&description, &store).unwrap();
        for step in 0..4 {
            store.set_time(step as f64 * 0.5);
            system.execute_time_step(&mut store).unwrap();
        }
        let y = store.value("y", &SymbolFocus::Global).unwrap();
        approx::assert_abs_diff_eq!(y, 2.0, epsilon = 1e-9);
    }
}
