use cellpotts::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use std::sync::Arc;

type Window = [std::ops::Range<i32>; 2];

const CENTRAL: Window = [5..25, 5..25];
// Spans the periodic boundary in x
const SEAM: Window = [-10..10, 5..25];

fn setup(boundary_order: usize) -> (CellStorage, CellLayer, Vec<CellId>) {
    let lattice = RegularLattice::square(30, 30, [true, true]).unwrap();
    let context = Arc::new(SimulationContext::new(lattice).with_boundary_order(boundary_order));
    let mut layer = CellLayer::new(&context, 0);
    let mut storage = CellStorage::new(context);
    let mut cells = Vec::new();
    // The last cell straddles the periodic boundary
    for (x0, y0) in [(8, 8), (15, 8), (10, 16), (27, 16)] {
        let cell = storage.create_cell(1);
        for x in x0..x0 + 5 {
            for y in y0..y0 + 5 {
                storage
                    .place_node(&mut layer, &NodePos::new(x, y, 0), cell)
                    .unwrap();
            }
        }
        cells.push(cell);
    }
    (storage, layer, cells)
}

fn assert_consistent(storage: &CellStorage, layer: &CellLayer) {
    let lattice = &storage.context().lattice;
    for cell in storage.cells() {
        let nodes = cell.nodes();
        assert_eq!(cell.n_nodes(), nodes.len());
        for node in nodes {
            assert_eq!(layer.get(node), cell.id());
            assert_eq!(&layer.state(node).pos, node);
        }
        let recount = layer.count_interfaces(cell.id(), nodes.iter());
        assert_eq!(cell.shape().raw_interfaces(), &recount, "cell {}", cell.id());
        if nodes.is_empty() {
            assert_eq!(cell.center(), OrthPos::zeros());
            continue;
        }
        let center =
            nodes.iter().map(|n| lattice.node_to_orth(n)).sum::<OrthPos>() / nodes.len() as f64;
        approx::assert_abs_diff_eq!(cell.center(), center, epsilon = 1e-9);
    }
}

fn random_walk(boundary_order: usize, window: Window, seed: u64) {
    let (mut storage, mut layer, cells) = setup(boundary_order);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let offsets = [(1, 0), (-1, 0), (0, 1), (0, -1)];
    let inside = |x: i32, y: i32| window[0].contains(&x) && window[1].contains(&y);
    for step in 0..3000 {
        let x = rng.gen_range(window[0].clone());
        let y = rng.gen_range(window[1].clone());
        let (dx, dy) = offsets[rng.gen_range(0..offsets.len())];
        // Copy the owner of a neighbor, staying inside the window
        let update = match inside(x + dx, y + dy) {
            true => layer
                .propose_copy(&NodePos::new(x + dx, y + dy, 0), &NodePos::new(-dx, -dy, 0))
                .unwrap(),
            false => layer.propose(&NodePos::new(x, y, 0), 0).unwrap(),
        };
        storage.set_update(&update);
        // Staging must not alter committed geometry
        if step % 500 == 0 {
            assert_consistent(&storage, &layer);
        }
        storage.apply_update(&update);
        layer.commit(&update).unwrap();
    }
    assert_consistent(&storage, &layer);
    assert!(cells.iter().any(|c| storage.cell(*c).unwrap().n_nodes() > 0));
}

#[test]
fn random_walk_keeps_geometry_consistent() {
    random_walk(1, CENTRAL, 0);
    random_walk(2, CENTRAL, 1);
}

#[test]
fn random_walk_across_periodic_boundary() {
    random_walk(1, SEAM, 2);
    random_walk(2, SEAM, 3);
}

#[test]
fn straddling_cells_stay_contiguous() {
    let (storage, _, cells) = setup(1);
    let cell = storage.cell(cells[3]).unwrap();
    assert_eq!(cell.center(), OrthPos::new(29.0, 18.0, 0.0));
    // A 5x5 block is round
    approx::assert_abs_diff_eq!(cell.eccentricity(), 0.0, epsilon = 1e-6);
    assert!(cell.length() < 6.0);
}

#[test]
fn interface_lengths_are_scaled() {
    let (storage, layer, cells) = setup(2);
    let cell = storage.cell(cells[0]).unwrap();
    let scaling = storage.context().boundary_length_scaling();
    let raw: u32 = cell.shape().raw_interfaces().values().sum();
    approx::assert_abs_diff_eq!(cell.interface_length(), raw as f64 / scaling, epsilon = 1e-12);
    assert_eq!(cell.surface_nodes(&layer).len(), 16);
}

#[test]
fn ellipsoid_degeneracy() {
    let lattice = RegularLattice::square(30, 30, [false, false]).unwrap();
    let context = Arc::new(SimulationContext::new(lattice));
    let mut layer = CellLayer::new(&context, 0);
    let mut storage = CellStorage::new(context);

    let empty = storage.create_cell(1);
    let ellipsoid = storage.cell(empty).unwrap().ellipsoid().clone();
    assert_eq!(ellipsoid.lengths, vec![0.0, 0.0]);
    assert_eq!(ellipsoid.eccentricity, 0.0);

    let single = storage.create_cell(1);
    storage
        .place_node(&mut layer, &NodePos::new(3, 3, 0), single)
        .unwrap();
    let cell = storage.cell(single).unwrap();
    assert_eq!(cell.length(), 0.0);
    assert_eq!(cell.eccentricity(), 0.0);

    let rod = storage.create_cell(1);
    for y in 10..20 {
        storage
            .place_node(&mut layer, &NodePos::new(12, y, 0), rod)
            .unwrap();
    }
    let cell = storage.cell(rod).unwrap();
    assert!(cell.length() > 0.0);
    approx::assert_abs_diff_eq!(cell.ellipsoid().lengths[1], 0.0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(cell.eccentricity(), 1.0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(cell.major_axis().x.abs(), 0.0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(
        cell.ellipsoid().orientation(),
        std::f64::consts::FRAC_PI_2,
        epsilon = 1e-9
    );
}

fn cube_cell() -> (CellStorage, CellLayer, CellId) {
    let lattice = RegularLattice::cubic(20, 20, 20, [true; 3]).unwrap();
    let context = Arc::new(
        SimulationContext::new(lattice)
            .with_membrane_resolution(12)
            .with_seed(5),
    );
    let mut layer = CellLayer::new(&context, 0);
    let mut storage = CellStorage::new(context);
    let cell = storage.create_cell(1);
    for x in 7..13 {
        for y in 7..13 {
            for z in 7..13 {
                storage
                    .place_node(&mut layer, &NodePos::new(x, y, z), cell)
                    .unwrap();
            }
        }
    }
    (storage, layer, cell)
}

#[test]
fn filled_membranes_are_stable() {
    let (storage, layer, id) = cube_cell();
    let cell = storage.cell(id).unwrap();
    let mut mapper =
        MembraneMapper::new(MappingMode::Continuous, false, storage.context()).unwrap();
    mapper.attach_to_cell(cell, &layer).unwrap();
    for node in cell.surface_nodes(&layer) {
        mapper.map_node(node, node.z as f64).unwrap();
    }
    mapper.fill_gaps();
    let first = mapper.data().clone();
    assert!(mapper.distance().data().iter().all(|d| *d < NO_DISTANCE));
    mapper.fill_gaps();
    assert_eq!(&first, mapper.data());

    // The top of the membrane reports the upper face of the cube
    let top = mapper.data().get([0, 0]);
    let bottom = mapper.data().get([0, first.size()[1] - 1]);
    assert!(top > bottom, "top {top} bottom {bottom}");
}

#[test]
fn spherical_approximation_of_cube() {
    let (storage, layer, id) = cube_cell();
    let cell = storage.cell(id).unwrap();
    let spherical = cell.shape().spherical_approx(&layer).unwrap();
    assert_eq!(spherical.dimensions(), 2);
    // Surface nodes lie between the inscribed and circumscribed sphere
    assert!(spherical.min() >= 2.5 - 1e-9);
    assert!(spherical.data().iter().all(|r| *r <= 2.5 * 3f64.sqrt() + 1e-9));
    approx::assert_abs_diff_eq!(cell.eccentricity(), 0.0, epsilon = 1e-6);
}

#[test]
fn boolean_ties_are_decided_by_chance() {
    let lattice = RegularLattice::square(40, 40, [true, true]).unwrap();
    let context = SimulationContext::new(lattice)
        .with_membrane_resolution(16)
        .with_seed(11);
    let mut mapper = MembraneMapper::new(MappingMode::Boolean, false, &context).unwrap();
    let n_trials = 4000;
    let mut ones = 0;
    for _ in 0..n_trials {
        mapper.attach_to_center(OrthPos::new(20.0, 20.0, 0.0));
        mapper.set([3, 0], 1.0);
        mapper.set([3, 0], 0.0);
        mapper.fill_gaps();
        let value = mapper.data().get([3, 0]);
        assert!(value == 0.0 || value == 1.0);
        ones += value as usize;
    }
    let fraction = ones as f64 / n_trials as f64;
    assert!((fraction - 0.5).abs() < 0.04, "fraction of ones {fraction}");

    // Majorities are not random
    for _ in 0..20 {
        mapper.attach_to_center(OrthPos::new(20.0, 20.0, 0.0));
        mapper.set([3, 0], 1.0);
        mapper.set([3, 0], 1.0);
        mapper.set([3, 0], 0.0);
        mapper.fill_gaps();
        assert!(mapper.data().data().iter().all(|v| *v == 1.0));
    }
}
