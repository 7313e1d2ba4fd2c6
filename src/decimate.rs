//! Resampling of a packet to the requested output resolution.
//!
//! Time is decimated by block averaging, space by plain striding. The two axes are
//! treated differently on purpose and downstream consumers rely on it.

use crate::{matrix::Matrix, packet::Packet};

/// Decimated samples plus the factors that produced them
#[derive(Clone, Debug, PartialEq)]
pub struct Decimated {
    pub data: Matrix,
    pub time_factor: usize,
    pub space_factor: usize,
}

/// Integer factor between two rates, rounding half to even
fn factor(ratio: f64) -> usize {
    let f = ratio.round_ties_even();
    if f.is_nan() || f < 0.0 {
        0
    } else {
        f as usize
    }
}

/// Number of samples to average into one along the time axis.
/// Falls back to 1 whenever the packet can't be split into whole blocks.
pub fn time_factor(packet: &Packet, target_sps: u32) -> usize {
    if target_sps == 0 {
        return 1;
    }
    let f = factor(packet.native_sps() as f64 / target_sps as f64);
    if f == 0 || packet.time_points() % f != 0 {
        1
    } else {
        f
    }
}

/// Column stride along the space axis, 1 when `target_dx` is unset
pub fn space_factor(packet: &Packet, target_dx: f64) -> usize {
    if target_dx <= 0.0 {
        return 1;
    }
    // A target finer than half the native spacing would round to zero
    factor(target_dx / packet.dx()).max(1)
}

/// Average every `factor` consecutive rows into one.
///
/// Sums are accumulated in `f64` and rounded to `f32` once per output value, so
/// results can differ in the last ulp from a mean accumulated in `f32`.
pub fn block_mean(input: &Matrix, factor: usize) -> Matrix {
    let cols = input.cols();
    let rows = input.rows() / factor;
    let mut acc = vec![0f64; cols];
    let mut out = Matrix::zeros(rows, cols);
    for r in 0..rows {
        acc.iter_mut().for_each(|a| *a = 0.0);
        for k in 0..factor {
            for (a, v) in acc.iter_mut().zip(input.row(r * factor + k)) {
                *a += *v as f64;
            }
        }
        for (c, a) in acc.iter().enumerate() {
            out.set(r, c, (*a / factor as f64) as f32);
        }
    }
    out
}

/// Keep every `stride`-th column, starting with the first
pub fn stride_cols(input: &Matrix, stride: usize) -> Matrix {
    if stride == 1 {
        return input.clone();
    }
    let cols = input.cols().div_ceil(stride);
    let mut out = Matrix::zeros(input.rows(), cols);
    for r in 0..input.rows() {
        for (c, v) in input.row(r).iter().step_by(stride).enumerate() {
            out.set(r, c, *v);
        }
    }
    out
}

/// Bring a decoded packet down to `target_sps` samples per second and `target_dx` meters
/// between channels. Zero on either target leaves that axis alone.
pub fn decimate(packet: &Packet, target_sps: u32, target_dx: f64) -> Decimated {
    debug_assert!(packet.decoded, "decimating an undecoded packet");
    let time_factor = time_factor(packet, target_sps);
    let space_factor = space_factor(packet, target_dx);
    let timed = if time_factor == 1 {
        packet.samples.clone()
    } else {
        block_mean(&packet.samples, time_factor)
    };
    Decimated {
        data: stride_cols(&timed, space_factor),
        time_factor,
        space_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `rows` x `cols` packet at 400 sps and 4.8 m spacing, sample value = row * 100 + col
    fn packet(rows: usize, cols: usize) -> Packet {
        let data = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r * 100 + c) as f32))
            .collect();
        Packet {
            set_count: 1,
            timestamp: 1690449193.04,
            spacing: [4.8, 2.5, 1.0],
            origin: [0.0; 3],
            index: [0, cols as i32 - 1, 0, rows as i32 - 1, 0, 0],
            unit_size: 4,
            samples: Matrix::from_vec(rows, cols, data).unwrap(),
            decoded: true,
        }
    }

    #[test]
    fn test_identity() {
        let p = packet(8, 5);
        let out = decimate(&p, 0, 0.0);
        assert_eq!(out.data, p.samples);
        assert_eq!((out.time_factor, out.space_factor), (1, 1));
    }

    #[test]
    fn test_block_mean() {
        // 400 sps -> 100 sps is a factor of 4
        let p = packet(8, 3);
        let out = decimate(&p, 100, 0.0);
        assert_eq!(out.time_factor, 4);
        assert_eq!(out.data.shape(), (2, 3));
        // mean of rows 0..4 in column 1 is 150 + 1
        assert_eq!(out.data.get(0, 1), 151.0);
        assert_eq!(out.data.get(1, 0), 550.0);
    }

    #[test]
    fn test_indivisible_falls_back() {
        // 7 rows can't be split into blocks of 4
        let p = packet(7, 3);
        let out = decimate(&p, 100, 0.0);
        assert_eq!(out.time_factor, 1);
        assert_eq!(out.data, p.samples);
    }

    #[test]
    fn test_zero_factor_falls_back() {
        // Asking for more samples than we have rounds to a factor of 0
        let p = packet(4, 2);
        assert_eq!(time_factor(&p, 1000), 1);
    }

    #[test]
    fn test_space_stride() {
        let p = packet(2, 10);
        // 10 m / 4.8 m rounds to 2
        let out = decimate(&p, 0, 10.0);
        assert_eq!(out.space_factor, 2);
        assert_eq!(out.data.shape(), (2, 5));
        assert_eq!(out.data.row(1), &[100.0, 102.0, 104.0, 106.0, 108.0]);

        let out = decimate(&p, 0, 14.4);
        assert_eq!(out.space_factor, 3);
        // ceil(10 / 3)
        assert_eq!(out.data.cols(), 4);
        assert_eq!(out.data.row(0), &[0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_both_axes() {
        let p = packet(4, 4);
        let out = decimate(&p, 200, 9.6);
        assert_eq!((out.time_factor, out.space_factor), (2, 2));
        assert_eq!(out.data.shape(), (2, 2));
        assert_eq!(out.data.row(0), &[50.0, 52.0]);
    }

    #[test]
    fn test_rounding_ties_even() {
        assert_eq!(factor(2.5), 2);
        assert_eq!(factor(3.5), 4);
        assert_eq!(factor(-1.0), 0);
    }
}
