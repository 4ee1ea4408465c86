use crate::line_list::LineList;
use log::{debug, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Match a character class body (the part right after `[`) against `c`.
///
/// The first character of the class is literal even if it is `]` or `-`,
/// `!` negates the class, `a-z` spans a range. Returns the match result and
/// the pattern remainder after the closing bracket, `None` on a broken class.
fn match_charclass(pat: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let mut i = 0;
    let complement = pat.first() == Some(&b'!');
    if complement {
        i += 1;
    }

    let mut matched = *pat.get(i)? == c;
    i += 1;

    while i < pat.len() && pat[i] != b']' {
        if matched {
            i += 1;
            continue;
        }
        if pat[i] == b'-' && i + 1 < pat.len() && pat[i + 1] != b']' {
            let (lo, hi) = (pat[i - 1], pat[i + 1]);
            if lo > hi {
                return None;
            }
            matched = lo <= c && c <= hi;
            i += 2;
        } else {
            matched = pat[i] == c;
            i += 1;
        }
    }

    if i >= pat.len() {
        // closing bracket not found
        return None;
    }
    Some((matched != complement, &pat[i + 1..]))
}

fn match_glob(mut text: &[u8], mut pat: &[u8], ignore_space: bool) -> bool {
    while !text.is_empty() && !pat.is_empty() && pat[0] != b'*' {
        if ignore_space {
            if text[0].is_ascii_whitespace() {
                text = &text[1..];
                continue;
            }
            if pat[0].is_ascii_whitespace() {
                pat = &pat[1..];
                continue;
            }
        }
        match pat[0] {
            b'?' => {
                text = &text[1..];
                pat = &pat[1..];
                continue;
            }
            b'[' => match match_charclass(&pat[1..], text[0]) {
                Some((true, rest)) => {
                    text = &text[1..];
                    pat = rest;
                    continue;
                }
                _ => return false,
            },
            b'\\' => {
                // escaped char matches as a normal char
                pat = &pat[1..];
                if pat.is_empty() {
                    return false;
                }
            }
            _ => {}
        }
        if text[0] != pat[0] {
            return false;
        }
        text = &text[1..];
        pat = &pat[1..];
    }

    if pat.first() == Some(&b'*') {
        while pat.first() == Some(&b'*') {
            pat = &pat[1..];
        }
        if pat.is_empty() {
            // tail wild card matches all
            return true;
        }
        while !text.is_empty() {
            if match_glob(text, pat, ignore_space) {
                return true;
            }
            text = &text[1..];
        }
    }

    text.is_empty() && pat.is_empty()
}

/// Whitespace-insensitive glob match of a source line against a lazy pattern.
pub fn lazy_match(line: &[u8], pattern: &str) -> bool {
    match_glob(line, pattern.as_bytes(), true)
}

/// Exact glob match (`*`, `?`, `[...]`, `\` escape).
pub fn glob_match(text: &str, pattern: &str) -> bool {
    match_glob(text.as_bytes(), pattern.as_bytes(), false)
}

/// Scan a source file and collect the numbers of all lines matching the lazy
/// pattern. Line numbers start at 1.
pub fn lazy_match_lines(path: &Path, pattern: &str) -> crate::error::Result<LineList> {
    let file = File::open(path).map_err(|e| {
        warn!(target: "resolver", "failed to open {path:?}: {e}");
        e
    })?;

    let mut list = LineList::new();
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        let mut line = line?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if lazy_match(&line, pattern) {
            list.add(idx as u64 + 1);
        }
    }

    if list.is_empty() {
        debug!(target: "resolver", "no matched lines found in {path:?}");
    }
    Ok(list)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plain_glob() {
        assert!(glob_match("schedule", "schedule"));
        assert!(glob_match("schedule", "sched*"));
        assert!(glob_match("schedule", "s?hed*"));
        assert!(glob_match("schedule", "*"));
        assert!(!glob_match("schedule", "sched"));
        assert!(!glob_match("sched", "schedule"));
        assert!(!glob_match("schedule", "Sched*"));
    }

    #[test]
    fn test_char_classes() {
        assert!(glob_match("v1", "v[0-9]"));
        assert!(glob_match("va", "v[!0-9]"));
        assert!(!glob_match("v1", "v[!0-9]"));
        assert!(glob_match("v]", "v[]]"));
        assert!(!glob_match("v1", "v[0-9"));
        assert!(!glob_match("v1", "v[9-0]"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match("a*b", "a\\*b"));
        assert!(!glob_match("axb", "a\\*b"));
        assert!(!glob_match("a", "a\\"));
    }

    #[test]
    fn test_lazy_match_ignores_whitespace() {
        assert!(lazy_match(b"\trq = cpu_rq(cpu);", "rq=cpu_rq*"));
        assert!(lazy_match(b"rq=cpu_rq(cpu);", "rq = cpu_rq*"));
        assert!(!lazy_match(b"\trq = task_rq(p);", "rq=cpu_rq*"));
    }

    #[test]
    fn test_lazy_match_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "int main(void)").unwrap();
        writeln!(file, "{{").unwrap();
        writeln!(file, "\tint rc = do_work();").unwrap();
        writeln!(file, "\treturn rc;").unwrap();
        writeln!(file, "}}").unwrap();
        file.flush().unwrap();

        let lines = lazy_match_lines(file.path(), "return*").expect("match lines");
        assert_eq!(lines.iter().collect::<Vec<_>>(), vec![4]);

        let lines = lazy_match_lines(file.path(), "rc=*").expect("match lines");
        assert_eq!(lines.iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_lazy_match_lines_missing_file() {
        let err = lazy_match_lines(Path::new("/nonexistent/file.c"), "*");
        assert!(err.is_err());
    }
}
