//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "printf-style rendering of event format strings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::primitive::Value;

/// Placeholder for a conversion with no argument left.
pub const MISSING: &str = "<missing>";

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

/// Apply `fmt` to `args` the way C's `printf` would for
/// `%s %d %i %u %x %X %f %c %%` with flags `-0+`, width and precision.
/// Unknown conversions are copied through verbatim.
pub fn printf(fmt: &str, args: &[&Value]) -> String {
    let mut out = String::with_capacity(fmt.len() + 16);
    let mut args = args.iter();
    let mut chars = fmt.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&(_, flag)) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = digits(&mut chars).unwrap_or(0);
        if chars.peek().map(|&(_, c)| c) == Some('.') {
            chars.next();
            spec.precision = Some(digits(&mut chars).unwrap_or(0));
        }
        // Length modifiers carry no meaning for already-decoded values.
        while let Some(&(_, 'l' | 'h' | 'z')) = chars.peek() {
            chars.next();
        }
        let Some((end, conv)) = chars.next() else {
            out.push_str(&fmt[start..]);
            break;
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        if !matches!(conv, 's' | 'd' | 'i' | 'u' | 'x' | 'X' | 'f' | 'c') {
            out.push_str(&fmt[start..end + conv.len_utf8()]);
            continue;
        }
        let rendered = match args.next() {
            Some(value) => convert(conv, &spec, value),
            None => MISSING.to_owned(),
        };
        pad(&mut out, &rendered, &spec, conv);
    }
    out
}

fn digits(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<usize> {
    let mut n: Option<usize> = None;
    while let Some(&(_, c)) = chars.peek() {
        let Some(d) = c.to_digit(10) else { break };
        n = Some(n.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    n
}

fn convert(conv: char, spec: &Spec, value: &Value) -> String {
    match conv {
        's' => {
            let text = value.to_string();
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        'd' | 'i' | 'u' => match value.as_i128() {
            Some(v) if spec.plus && v >= 0 => format!("+{v}"),
            Some(v) => v.to_string(),
            None => match value.as_f64() {
                Some(f) => (f.trunc() as i128).to_string(),
                None => value.to_string(),
            },
        },
        'x' | 'X' => match value.as_i128() {
            Some(v) => {
                // Negative values print as their 64-bit two's complement.
                let v = if v < 0 { v as i64 as u64 as u128 } else { v as u128 };
                if conv == 'x' {
                    format!("{v:x}")
                } else {
                    format!("{v:X}")
                }
            }
            None => value.to_string(),
        },
        'f' => match value.as_f64() {
            Some(f) => {
                let p = spec.precision.unwrap_or(6);
                if spec.plus && f >= 0.0 {
                    format!("+{f:.p$}")
                } else {
                    format!("{f:.p$}")
                }
            }
            None => value.to_string(),
        },
        'c' => match value.as_i128().and_then(|v| u32::try_from(v).ok()).and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => value.to_string(),
        },
        _ => value.to_string(),
    }
}

fn pad(out: &mut String, rendered: &str, spec: &Spec, conv: char) {
    let len = rendered.chars().count();
    if len >= spec.width {
        out.push_str(rendered);
        return;
    }
    let fill = spec.width - len;
    if spec.left {
        out.push_str(rendered);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if spec.zero && conv != 's' && conv != 'c' {
        // Zeros go after any sign.
        let (sign, digits) = match rendered.strip_prefix(&['-', '+'][..]) {
            Some(rest) => rendered.split_at(rendered.len() - rest.len()),
            None => ("", rendered),
        };
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(rendered);
    }
}
