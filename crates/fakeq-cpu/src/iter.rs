// Element-wise driver — pairs output positions with input positions
//
// Every CPU kernel in this crate is a per-element closure handed to one of
// these walkers. The walker owns the layout logic:
//
//   1. Inputs are broadcast to the output shape (stride 0 on stretched dims).
//   2. Each layout is checked against the length of its storage, so a bad
//      view is an error instead of an index panic.
//   3. If every operand is a dense range of the same shape, the slices are
//      zipped directly. Ranges of PARALLEL_THRESHOLD elements or more are
//      split into CHUNK-sized pieces and processed on the rayon pool.
//   4. Otherwise the StridedIter of each operand is walked in lockstep on the
//      calling thread.
//
// The closures are pure functions of their own input elements, so the chunk
// split changes nothing in the results.

use fakeq_core::error::{Error, Result};
use fakeq_core::layout::Layout;
use rayon::prelude::*;

/// Minimum element count for the parallel dense path.
pub const PARALLEL_THRESHOLD: usize = 1 << 15;

/// Elements per rayon task on the parallel path.
const CHUNK: usize = 1 << 12;

/// Which loop a walker took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Zipped dense slices on the calling thread.
    Dense,
    /// Zipped dense slices split across the rayon pool.
    Parallel,
    /// Lockstep strided index walk.
    Strided,
}

impl Walk {
    fn dense(len: usize) -> Self {
        if len >= PARALLEL_THRESHOLD {
            Walk::Parallel
        } else {
            Walk::Dense
        }
    }
}

fn check_extent(len: usize, layout: &Layout, what: &str) -> Result<()> {
    let extent = layout.storage_extent();
    if extent > len {
        return Err(Error::msg(format!(
            "{what} layout {:?} needs {extent} elements of storage, buffer has {len}",
            layout
        )));
    }
    Ok(())
}

/// `out[i] = f(inp[i])` over the broadcast pairing of the two layouts.
pub fn unary_map<T, U, F>(
    out: &mut [U],
    out_layout: &Layout,
    inp: &[T],
    inp_layout: &Layout,
    f: F,
) -> Result<Walk>
where
    T: Copy + Send + Sync,
    U: Send,
    F: Fn(T) -> U + Sync,
{
    let inp_layout = inp_layout.broadcast_as(out_layout.shape())?;
    check_extent(out.len(), out_layout, "output")?;
    check_extent(inp.len(), &inp_layout, "input")?;

    if let (Some(o), Some(i)) = (out_layout.contiguous_range(), inp_layout.contiguous_range()) {
        let (out, inp) = (&mut out[o], &inp[i]);
        let walk = Walk::dense(out.len());
        if walk == Walk::Parallel {
            out.par_chunks_mut(CHUNK)
                .zip(inp.par_chunks(CHUNK))
                .for_each(|(oc, ic)| {
                    for (o, &x) in oc.iter_mut().zip(ic) {
                        *o = f(x);
                    }
                });
        } else {
            for (o, &x) in out.iter_mut().zip(inp) {
                *o = f(x);
            }
        }
        return Ok(walk);
    }

    for (oi, ii) in out_layout
        .strided_indices()
        .zip(inp_layout.strided_indices())
    {
        out[oi] = f(inp[ii]);
    }
    Ok(Walk::Strided)
}

/// `out[i] = f(a[i], b[i])` over the broadcast pairing of the three layouts.
pub fn binary_map<T, F>(
    out: &mut [T],
    out_layout: &Layout,
    a: &[T],
    a_layout: &Layout,
    b: &[T],
    b_layout: &Layout,
    f: F,
) -> Result<Walk>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    let a_layout = a_layout.broadcast_as(out_layout.shape())?;
    let b_layout = b_layout.broadcast_as(out_layout.shape())?;
    check_extent(out.len(), out_layout, "output")?;
    check_extent(a.len(), &a_layout, "lhs")?;
    check_extent(b.len(), &b_layout, "rhs")?;

    if let (Some(o), Some(ra), Some(rb)) = (
        out_layout.contiguous_range(),
        a_layout.contiguous_range(),
        b_layout.contiguous_range(),
    ) {
        let (out, a, b) = (&mut out[o], &a[ra], &b[rb]);
        let walk = Walk::dense(out.len());
        if walk == Walk::Parallel {
            out.par_chunks_mut(CHUNK)
                .zip(a.par_chunks(CHUNK).zip(b.par_chunks(CHUNK)))
                .for_each(|(oc, (ac, bc))| {
                    for ((o, &x), &y) in oc.iter_mut().zip(ac).zip(bc) {
                        *o = f(x, y);
                    }
                });
        } else {
            for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
                *o = f(x, y);
            }
        }
        return Ok(walk);
    }

    for ((oi, ai), bi) in out_layout
        .strided_indices()
        .zip(a_layout.strided_indices())
        .zip(b_layout.strided_indices())
    {
        out[oi] = f(a[ai], b[bi]);
    }
    Ok(Walk::Strided)
}

/// `buf[i] = f(buf[i])` over one view: the output aliases the input and each
/// element is read before it is overwritten.
pub fn inplace_map<T, F>(buf: &mut [T], layout: &Layout, f: F) -> Result<Walk>
where
    T: Copy + Send + Sync,
    F: Fn(T) -> T + Sync,
{
    check_extent(buf.len(), layout, "in-place")?;

    if let Some(r) = layout.contiguous_range() {
        let buf = &mut buf[r];
        let walk = Walk::dense(buf.len());
        if walk == Walk::Parallel {
            buf.par_chunks_mut(CHUNK).for_each(|c| {
                for v in c.iter_mut() {
                    *v = f(*v);
                }
            });
        } else {
            for v in buf.iter_mut() {
                *v = f(*v);
            }
        }
        return Ok(walk);
    }

    for i in layout.strided_indices() {
        buf[i] = f(buf[i]);
    }
    Ok(Walk::Strided)
}

/// Copy a view out into a dense Vec in logical order.
pub fn gather<T: Copy>(src: &[T], layout: &Layout) -> Result<Vec<T>> {
    check_extent(src.len(), layout, "source")?;
    if let Some(r) = layout.contiguous_range() {
        return Ok(src[r].to_vec());
    }
    Ok(layout.strided_indices().map(|i| src[i]).collect())
}
