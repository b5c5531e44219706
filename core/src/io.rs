//! Binary read/write of one window result: a fixed little-endian header
//! (counts, time bounds, per-band scalars) followed by the flattened band
//! grids. The layout round-trips losslessly; the per-frequency cube is a
//! transient in-memory product and is not persisted.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use std::io::{self, Read, Write};

use crate::params::{FrequencyBand, MAX_BANDS};
use crate::result::{BandResult, FineGrid, GridAxes, GridPeak, SingleWindowResult, SlownessGrid};

const MAGIC: u32 = u32::from_le_bytes(*b"FKR1");
const VERSION: u16 = 1;

/// Largest accepted grid axis when reading, a corruption guard.
const MAX_GRID_NODES: u32 = 1 << 16;

pub fn write_result<W: Write>(w: &mut W, result: &SingleWindowResult) -> io::Result<()> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u16::<LittleEndian>(VERSION)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_f64::<LittleEndian>(result.tbeg)?;
    w.write_f64::<LittleEndian>(result.tend)?;
    w.write_u32::<LittleEndian>(result.bands.len() as u32)?;
    for band in &result.bands {
        write_band(w, band)?;
    }
    Ok(())
}

pub fn read_result<R: Read>(r: &mut R) -> io::Result<SingleWindowResult> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(invalid("bad magic"));
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(invalid("unsupported version"));
    }
    let _reserved = r.read_u16::<LittleEndian>()?;
    let tbeg = r.read_f64::<LittleEndian>()?;
    let tend = r.read_f64::<LittleEndian>()?;
    let nbands = r.read_u32::<LittleEndian>()? as usize;
    if nbands > MAX_BANDS {
        return Err(invalid("band count out of range"));
    }
    let mut bands = Vec::with_capacity(nbands);
    for _ in 0..nbands {
        bands.push(read_band(r)?);
    }
    Ok(SingleWindowResult {
        tbeg,
        tend,
        bands,
        cube: None,
    })
}

fn write_band<W: Write>(w: &mut W, band: &BandResult) -> io::Result<()> {
    w.write_f64::<LittleEndian>(band.band.fmin)?;
    w.write_f64::<LittleEndian>(band.band.fmax)?;
    w.write_f64::<LittleEndian>(band.total_power)?;
    w.write_f64::<LittleEndian>(band.fstat)?;
    write_peak(w, &band.peak)?;
    match &band.restricted_peak {
        Some(peak) => {
            w.write_u8(1)?;
            write_peak(w, peak)?;
        }
        None => w.write_u8(0)?,
    }
    match &band.fine {
        Some(fine) => {
            w.write_u8(1)?;
            write_peak(w, &fine.peak)?;
            write_grid(w, &fine.grid)?;
        }
        None => w.write_u8(0)?,
    }
    write_grid(w, &band.grid)
}

fn read_band<R: Read>(r: &mut R) -> io::Result<BandResult> {
    let fmin = r.read_f64::<LittleEndian>()?;
    let fmax = r.read_f64::<LittleEndian>()?;
    let total_power = r.read_f64::<LittleEndian>()?;
    let fstat = r.read_f64::<LittleEndian>()?;
    let peak = read_peak(r)?;
    let restricted_peak = match r.read_u8()? {
        0 => None,
        1 => Some(read_peak(r)?),
        _ => return Err(invalid("bad restricted-peak flag")),
    };
    let fine = match r.read_u8()? {
        0 => None,
        1 => {
            let peak = read_peak(r)?;
            let grid = read_grid(r)?;
            Some(FineGrid { grid, peak })
        }
        _ => return Err(invalid("bad fine-grid flag")),
    };
    let grid = read_grid(r)?;
    Ok(BandResult {
        band: FrequencyBand::new(fmin, fmax),
        grid,
        peak,
        total_power,
        fstat,
        restricted_peak,
        fine,
    })
}

fn write_peak<W: Write>(w: &mut W, peak: &GridPeak) -> io::Result<()> {
    w.write_f64::<LittleEndian>(peak.x)?;
    w.write_f64::<LittleEndian>(peak.y)?;
    w.write_f64::<LittleEndian>(peak.value)
}

fn read_peak<R: Read>(r: &mut R) -> io::Result<GridPeak> {
    Ok(GridPeak {
        x: r.read_f64::<LittleEndian>()?,
        y: r.read_f64::<LittleEndian>()?,
        value: r.read_f64::<LittleEndian>()?,
    })
}

fn write_grid<W: Write>(w: &mut W, grid: &SlownessGrid) -> io::Result<()> {
    w.write_f64::<LittleEndian>(grid.axes.x0)?;
    w.write_f64::<LittleEndian>(grid.axes.y0)?;
    w.write_f64::<LittleEndian>(grid.axes.dx)?;
    w.write_f64::<LittleEndian>(grid.axes.dy)?;
    w.write_u32::<LittleEndian>(grid.nx() as u32)?;
    w.write_u32::<LittleEndian>(grid.ny() as u32)?;
    for value in grid.values.iter() {
        w.write_f64::<LittleEndian>(*value)?;
    }
    Ok(())
}

fn read_grid<R: Read>(r: &mut R) -> io::Result<SlownessGrid> {
    let x0 = r.read_f64::<LittleEndian>()?;
    let y0 = r.read_f64::<LittleEndian>()?;
    let dx = r.read_f64::<LittleEndian>()?;
    let dy = r.read_f64::<LittleEndian>()?;
    let nx = r.read_u32::<LittleEndian>()?;
    let ny = r.read_u32::<LittleEndian>()?;
    if nx == 0 || ny == 0 || nx > MAX_GRID_NODES || ny > MAX_GRID_NODES {
        return Err(invalid("grid dimensions out of range"));
    }
    let (nx, ny) = (nx as usize, ny as usize);
    let mut values = Vec::with_capacity(nx * ny);
    for _ in 0..nx * ny {
        values.push(r.read_f64::<LittleEndian>()?);
    }
    let values = Array2::from_shape_vec((ny, nx), values)
        .map_err(|_| invalid("grid shape mismatch"))?;
    Ok(SlownessGrid {
        axes: GridAxes { x0, y0, dx, dy },
        values,
    })
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn sample_result() -> SingleWindowResult {
        let grid = SlownessGrid {
            axes: GridAxes::symmetric(0.4, 3),
            values: arr2(&[[0.1, 0.2, 0.3], [0.4, 0.95, 0.5], [0.6, 0.7, 0.8]]),
        };
        let fine = FineGrid {
            grid: SlownessGrid {
                axes: GridAxes {
                    x0: -0.05,
                    y0: -0.05,
                    dx: 0.01,
                    dy: 0.01,
                },
                values: arr2(&[[0.2, 0.3], [0.4, 0.96]]),
            },
            peak: GridPeak {
                x: -0.04,
                y: -0.04,
                value: 0.96,
            },
        };
        SingleWindowResult {
            tbeg: 1234.5,
            tend: 1244.5,
            bands: vec![
                BandResult {
                    band: FrequencyBand::new(0.5, 6.0),
                    grid: grid.clone(),
                    peak: GridPeak {
                        x: 0.0,
                        y: 0.0,
                        value: 0.95,
                    },
                    total_power: 42.75,
                    fstat: 19.0,
                    restricted_peak: Some(GridPeak {
                        x: 0.4,
                        y: -0.4,
                        value: 0.8,
                    }),
                    fine: Some(fine),
                },
                BandResult {
                    band: FrequencyBand::new(1.0, 3.0),
                    grid,
                    peak: GridPeak {
                        x: -0.4,
                        y: 0.0,
                        value: 0.6,
                    },
                    total_power: 7.5,
                    fstat: 1.5,
                    restricted_peak: None,
                    fine: None,
                },
            ],
            cube: None,
        }
    }

    #[test]
    fn result_round_trips_exactly() {
        let original = sample_result();
        let mut buf = Vec::new();
        write_result(&mut buf, &original).unwrap();
        let restored = read_result(&mut buf.as_slice()).unwrap();

        assert_eq!(restored.tbeg, original.tbeg);
        assert_eq!(restored.tend, original.tend);
        assert_eq!(restored.bands.len(), original.bands.len());
        for (a, b) in restored.bands.iter().zip(&original.bands) {
            assert_eq!(a.band, b.band);
            assert_eq!(a.peak, b.peak);
            assert_eq!(a.total_power, b.total_power);
            assert_eq!(a.fstat, b.fstat);
            assert_eq!(a.restricted_peak, b.restricted_peak);
            assert_eq!(a.grid.values, b.grid.values);
            assert_eq!(a.grid.axes, b.grid.axes);
            assert_eq!(a.fine.is_some(), b.fine.is_some());
            if let (Some(fa), Some(fb)) = (&a.fine, &b.fine) {
                assert_eq!(fa.peak, fb.peak);
                assert_eq!(fa.grid.values, fb.grid.values);
            }
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        write_result(&mut buf, &sample_result()).unwrap();
        buf[0] ^= 0xff;
        assert!(read_result(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut buf = Vec::new();
        write_result(&mut buf, &sample_result()).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(read_result(&mut buf.as_slice()).is_err());
    }
}
