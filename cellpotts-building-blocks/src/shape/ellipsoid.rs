use cellpotts_concepts::OrthPos;
use nalgebra::{Matrix2, Matrix3, SymmetricEigen};
use serde::{Deserialize, Serialize};

/// Ellipsoid with the same second moments as the nodes of a cell.
///
/// Axes are sorted by descending length.
/// In two dimensions, the lengths of the major and minor axes are derived from the
/// eigenvalues $\lambda_a\leq\lambda_b$ of the inertia tensor
/// \\begin{equation}
///     I = \begin{pmatrix}
///         \sum_i \Delta y_i^2 & -\sum_i \Delta x_i\Delta y_i\\\\
///         -\sum_i \Delta x_i\Delta y_i & \sum_i \Delta x_i^2
///     \end{pmatrix}
/// \\end{equation}
/// as $4\sqrt{\lambda_b/N}$ and $4\sqrt{\lambda_a/N}$.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EllipsoidShape {
    /// Centroid of the cell
    pub center: OrthPos,
    /// Number of nodes
    pub volume: usize,
    /// Length of every axis, descending
    pub lengths: Vec<f64>,
    /// Unit vector of every axis
    pub axes: Vec<OrthPos>,
    /// $\sqrt{1-(l_\text{min}/l_\text{max})^2}$
    pub eccentricity: f64,
}

impl EllipsoidShape {
    /// Derive the ellipsoid from the central second moments $\sum_i \Delta x_i\Delta x_i^T$.
    ///
    /// Cells with at most one node yield zero-length axes.
    pub fn from_central_moments(
        dimensions: usize,
        volume: usize,
        center: OrthPos,
        moments: &Matrix3<f64>,
    ) -> Self {
        let n_axes = if dimensions == 3 { 3 } else { 2 };
        if volume <= 1 {
            return Self {
                center,
                volume,
                lengths: vec![0.0; n_axes],
                axes: (0..n_axes)
                    .map(|i| {
                        let mut axis = OrthPos::zeros();
                        axis[i] = 1.0;
                        axis
                    })
                    .collect(),
                eccentricity: 0.0,
            };
        }
        let n = volume as f64;
        let mut axes: Vec<(f64, OrthPos)> = if n_axes == 2 {
            let inertia = Matrix2::new(
                moments[(1, 1)],
                -moments[(0, 1)],
                -moments[(0, 1)],
                moments[(0, 0)],
            );
            let eigen = SymmetricEigen::new(inertia);
            let (a, b) = match eigen.eigenvalues[0] <= eigen.eigenvalues[1] {
                true => (0, 1),
                false => (1, 0),
            };
            let lambda_a = eigen.eigenvalues[a].max(0.0);
            let lambda_b = eigen.eigenvalues[b].max(0.0);
            let direction = |i: usize| {
                let v = eigen.eigenvectors.column(i);
                OrthPos::new(v[0], v[1], 0.0).normalize()
            };
            vec![
                (4.0 * (lambda_b / n).sqrt(), direction(a)),
                (4.0 * (lambda_a / n).sqrt(), direction(b)),
            ]
        } else {
            let trace = moments.trace();
            let inertia = Matrix3::identity() * trace - moments;
            let eigen = SymmetricEigen::new(inertia);
            let sum = eigen.eigenvalues.sum();
            (0..3)
                .map(|i| {
                    let length = (2.5 / n * (sum - 2.0 * eigen.eigenvalues[i])).max(0.0).sqrt();
                    (length, eigen.eigenvectors.column(i).into_owned().normalize())
                })
                .collect()
        };
        axes.sort_by(|(l1, _), (l2, _)| l2.total_cmp(l1));
        let eccentricity = match axes[0].0 > 0.0 {
            true => (1.0 - (axes[n_axes - 1].0 / axes[0].0).powi(2)).max(0.0).sqrt(),
            false => 0.0,
        };
        Self {
            center,
            volume,
            lengths: axes.iter().map(|(l, _)| *l).collect(),
            axes: axes.into_iter().map(|(_, a)| a).collect(),
            eccentricity,
        }
    }

    /// Direction of the longest axis.
    pub fn major_axis(&self) -> OrthPos {
        self.axes[0]
    }

    /// Direction of the shortest axis.
    pub fn minor_axis(&self) -> OrthPos {
        self.axes[self.axes.len() - 1]
    }

    /// Angle of the major axis in the xy-plane, in $[0,\pi)$.
    pub fn orientation(&self) -> f64 {
        let major = self.major_axis();
        major.y.atan2(major.x).rem_euclid(std::f64::consts::PI)
    }
}
