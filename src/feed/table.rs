/// Renders rows as a grid table, with an optional `=`-underlined header row.
///
/// ```text
/// +-----------+--------+
/// | Timestamp | Value  |
/// +===========+========+
/// | 08:00:00  | 21.5 % |
/// +-----------+--------+
/// ```
pub fn render_grid(headers: Option<&[&str]>, rows: &[Vec<String>]) -> String {
    let columns = headers
        .map(|h| h.len())
        .into_iter()
        .chain(rows.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let mut widths = vec![0usize; columns];
    let header_cells = headers.unwrap_or(&[]).iter().map(|s| s.to_string());
    for (i, cell) in header_cells.enumerate() {
        widths[i] = widths[i].max(cell.chars().count());
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let border = |fill: char| {
        let mut line = String::from("+");
        for width in &widths {
            line.extend(std::iter::repeat(fill).take(width + 2));
            line.push('+');
        }
        line
    };
    let line = |cells: &[String]| {
        let mut out = String::from("|");
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let pad = width - cell.chars().count();
            out.push(' ');
            out.push_str(cell);
            out.extend(std::iter::repeat(' ').take(pad + 1));
            out.push('|');
        }
        out
    };

    let mut out = vec![border('-')];
    if let Some(headers) = headers {
        let cells: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        out.push(line(&cells));
        out.push(border('='));
    }
    for row in rows {
        out.push(line(row));
        out.push(border('-'));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_without_headers() {
        let rows = vec![
            vec!["CO2".to_string(), "612 ppm".to_string()],
            vec!["Humidity".to_string(), "40 %".to_string()],
        ];
        let expected = "\
+----------+---------+
| CO2      | 612 ppm |
+----------+---------+
| Humidity | 40 %    |
+----------+---------+";
        assert_eq!(render_grid(None, &rows), expected);
    }

    #[test]
    fn test_grid_with_headers_and_unicode() {
        let rows = vec![vec!["a".to_string(), "1 °C".to_string()]];
        let expected = "\
+---+------+
| T | V    |
+===+======+
| a | 1 °C |
+---+------+";
        assert_eq!(render_grid(Some(&["T", "V"]), &rows), expected);
    }
}
