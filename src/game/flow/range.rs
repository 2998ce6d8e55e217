use crate::game::chart::Row;

/// Inclusive span of row-arena indices forming a construct's body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BodyRange {
    pub start: usize,
    pub end: usize,
}

impl BodyRange {
    #[inline(always)]
    pub const fn contains(&self, idx: usize) -> bool {
        idx >= self.start && idx <= self.end
    }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    /// Arena index right after the body; may equal the row count.
    #[inline(always)]
    pub const fn after(&self) -> usize {
        self.end + 1
    }
}

/// Body of a construct anchored at `anchor` with indent `indent`: the rows
/// right after the anchor whose indent is strictly greater, up to the row
/// before indent returns to `<= indent` (or the last row).
pub fn compute_body_range(rows: &[Row], anchor: usize, indent: u32) -> Result<BodyRange, &'static str> {
    let start = anchor + 1;
    if start >= rows.len() {
        return Err("anchor is the last row");
    }
    if rows[start].indent <= indent {
        return Err("no deeper-indented row follows the anchor");
    }
    let end = rows[start..]
        .iter()
        .position(|r| r.indent <= indent)
        .map_or(rows.len() - 1, |off| start + off - 1);
    Ok(BodyRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(indents: &[u32]) -> Vec<Row> {
        indents
            .iter()
            .enumerate()
            .map(|(i, &ind)| {
                let mut r = Row::new(-(i as i32) - 1);
                r.indent = ind;
                r
            })
            .collect()
    }

    #[test]
    fn body_stops_when_indent_returns() {
        let rs = rows(&[0, 1, 2, 1, 0, 1]);
        assert_eq!(compute_body_range(&rs, 0, 0), Ok(BodyRange { start: 1, end: 3 }));
        assert_eq!(compute_body_range(&rs, 1, 1), Ok(BodyRange { start: 2, end: 2 }));
    }

    #[test]
    fn body_runs_to_the_last_row() {
        let rs = rows(&[0, 1, 1]);
        let r = compute_body_range(&rs, 0, 0).expect("valid");
        assert_eq!(r, BodyRange { start: 1, end: 2 });
        assert_eq!(r.len(), 2);
        assert_eq!(r.after(), 3);
    }

    #[test]
    fn degenerate_anchors_fail() {
        let rs = rows(&[0, 0, 1]);
        assert!(compute_body_range(&rs, 2, 1).is_err(), "anchor at last row");
        assert!(compute_body_range(&rs, 0, 0).is_err(), "next row not deeper");
    }
}
