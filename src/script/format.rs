//! Text rendering of numbers and strings: reprs, format specs, `%` and
//! `str.format` templates.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Shortest round-tripping float representation, switching to exponent
/// notation outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{:e}", value);
    let (mantissa, exponent) = split_exponent(&sci);
    if (-4..16).contains(&exponent) {
        let plain = format!("{}", value);
        if plain.contains('.') {
            plain
        } else {
            plain + ".0"
        }
    } else {
        format!("{}{}", mantissa, exponent_suffix(exponent))
    }
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn exponent_suffix(exponent: i32) -> String {
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("e{}{:02}", sign, exponent.abs())
}

/// Quote a string the way `repr` does.
pub fn quote_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || (0x7f..0xa0).contains(&(c as u32)) => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Round to the nearest integer, ties to even.
pub fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

/// A parsed `[[fill]align][sign][#][0][width][,][.precision][type]` spec.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;

        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| is_align(*c)) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            out.sign = c;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            out.width = digits.parse().map_err(|_| "Too many decimal digits in format string")?;
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return Err("Format specifier missing precision".to_string());
            }
            let digits: String = chars[start..i].iter().collect();
            out.precision =
                Some(digits.parse().map_err(|_| "Too many decimal digits in format string")?);
        }
        if let Some(&c) = chars.get(i) {
            out.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err("Invalid format specifier".to_string());
        }
        Ok(out)
    }

    fn pad(&self, prefix: &str, body: &str, default_align: char) -> String {
        let align = self
            .align
            .unwrap_or(if self.zero { '=' } else { default_align });
        let fill = if self.align.is_none() && self.zero {
            '0'
        } else {
            self.fill
        };
        let len = prefix.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{}{}", prefix, body);
        }
        let pad = self.width - len;
        let fill_n = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
        match align {
            '<' => format!("{}{}{}", prefix, body, fill_n(pad)),
            '^' => format!("{}{}{}{}", fill_n(pad / 2), prefix, body, fill_n(pad - pad / 2)),
            '=' => format!("{}{}{}", prefix, fill_n(pad), body),
            _ => format!("{}{}{}", fill_n(pad), prefix, body),
        }
    }

    fn sign_prefix(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

/// Format an integer according to `spec`.
pub fn format_int(value: i64, spec: &FormatSpec) -> Result<String, String> {
    format_integer(&BigInt::from(value), spec)
}

/// Format an integer of any size according to `spec`.
pub fn format_integer(value: &BigInt, spec: &FormatSpec) -> Result<String, String> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        let float = value
            .to_f64()
            .filter(|f| f.is_finite())
            .ok_or("int too large to convert to float")?;
        return format_float(float, spec);
    }
    if spec.precision.is_some() {
        return Err("Precision not allowed in integer format specifier".to_string());
    }

    let magnitude = value.magnitude();
    let (digits, prefix) = match kind {
        'd' | 'n' => (magnitude.to_string(), ""),
        'x' => (magnitude.to_str_radix(16), "0x"),
        'X' => (magnitude.to_str_radix(16).to_uppercase(), "0X"),
        'o' => (magnitude.to_str_radix(8), "0o"),
        'b' => (magnitude.to_str_radix(2), "0b"),
        'c' => {
            let c = value
                .to_u32()
                .and_then(char::from_u32)
                .ok_or("%c arg not in range(0x110000)")?;
            return Ok(spec.pad("", &c.to_string(), '<'));
        }
        other => {
            return Err(format!(
                "Unknown format code '{}' for object of type 'int'",
                other
            ))
        }
    };

    let digits = match spec.grouping {
        Some(sep) if matches!(kind, 'd' | 'n') => group_digits(&digits, sep, 3),
        Some('_') => group_digits(&digits, '_', 4),
        Some(_) => return Err(format!("Cannot specify ',' with '{}'.", kind)),
        None => digits,
    };
    let mut head = spec.sign_prefix(value.is_negative()).to_string();
    if spec.alternate {
        head.push_str(prefix);
    }
    Ok(spec.pad(&head, &digits, '>'))
}

/// Format a float according to `spec`.
pub fn format_float(value: f64, spec: &FormatSpec) -> Result<String, String> {
    let kind = spec.kind;
    let upper = matches!(kind, Some('F' | 'E' | 'G'));
    let negative = value < 0.0 || (value == 0.0 && value.is_sign_negative());
    let magnitude = value.abs();

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        if kind == Some('%') {
            text + "%"
        } else {
            text
        }
    } else {
        match kind {
            None => match spec.precision {
                Some(precision) => {
                    let text = general(magnitude, precision, spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        text + ".0"
                    }
                }
                None => float_repr(magnitude),
            },
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6)),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            Some(other) => {
                return Err(format!(
                    "Unknown format code '{}' for object of type 'float'",
                    other
                ))
            }
        }
    };
    let body = if upper { body.to_uppercase() } else { body };

    let body = match spec.grouping {
        Some(sep) => {
            let split = body.find(['.', 'e', 'E', '%']).unwrap_or(body.len());
            let (int_part, rest) = body.split_at(split);
            if int_part.chars().all(|c| c.is_ascii_digit()) {
                format!("{}{}", group_digits(int_part, sep, 3), rest)
            } else {
                body.clone()
            }
        }
        None => body,
    };
    Ok(spec.pad(spec.sign_prefix(negative), &body, '>'))
}

fn scientific(value: f64, precision: usize) -> String {
    let sci = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = split_exponent(&sci);
    format!("{}{}", mantissa, exponent_suffix(exponent))
}

fn general(value: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let exponent = if value == 0.0 {
        0
    } else {
        split_exponent(&format!("{:.*e}", precision - 1, value)).1
    };

    let strip = |text: String| -> String {
        if alternate || !text.contains('.') {
            return text;
        }
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    };

    if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        strip(format!("{:.*}", decimals, value))
    } else {
        let sci = format!("{:.*e}", precision - 1, value);
        let (mantissa, exponent) = split_exponent(&sci);
        format!("{}{}", strip(mantissa.to_string()), exponent_suffix(exponent))
    }
}

/// Format text according to `spec`.
pub fn format_str(text: &str, spec: &FormatSpec) -> Result<String, String> {
    match spec.kind {
        None | Some('s') => {}
        Some(other) => {
            return Err(format!(
                "Unknown format code '{}' for object of type 'str'",
                other
            ))
        }
    }
    if spec.sign != '-' {
        return Err("Sign not allowed in string format specifier".to_string());
    }
    if spec.align == Some('=') {
        return Err("'=' alignment not allowed in string format specifier".to_string());
    }
    let body: String = match spec.precision {
        Some(precision) => text.chars().take(precision).collect(),
        None => text.to_string(),
    };
    Ok(spec.pad("", &body, '<'))
}

/// One piece of a `str.format` template.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatPiece {
    Literal(String),
    Field {
        name: String,
        conversion: Option<char>,
        spec: String,
    },
}

/// Split a `str.format` template into literals and replacement fields.
pub fn parse_format_string(template: &str) -> Result<Vec<FormatPiece>, String> {
    let chars: Vec<char> = template.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err("Single '}' encountered in format string".to_string()),
            '{' => {
                let mut depth = 1;
                let mut j = i + 1;
                while j < chars.len() {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("expected '}' before end of string".to_string());
                }
                if !literal.is_empty() {
                    pieces.push(FormatPiece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(parse_field(&chars[i + 1..j])?);
                i = j + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        pieces.push(FormatPiece::Literal(literal));
    }
    Ok(pieces)
}

fn parse_field(field: &[char]) -> Result<FormatPiece, String> {
    let mut bracket = false;
    let mut name_end = field.len();
    for (i, c) in field.iter().enumerate() {
        match c {
            '[' => bracket = true,
            ']' => bracket = false,
            '!' | ':' if !bracket => {
                name_end = i;
                break;
            }
            _ => {}
        }
    }
    let name: String = field[..name_end].iter().collect();
    let mut rest = &field[name_end..];

    let mut conversion = None;
    if rest.first() == Some(&'!') {
        match rest.get(1) {
            Some(&c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => return Err("Unknown conversion specifier".to_string()),
        }
        rest = &rest[2..];
        if !rest.is_empty() && rest[0] != ':' {
            return Err("expected ':' after conversion specifier".to_string());
        }
    }
    let spec = if rest.first() == Some(&':') {
        rest[1..].iter().collect()
    } else {
        String::new()
    };
    Ok(FormatPiece::Field {
        name,
        conversion,
        spec,
    })
}

/// One piece of a `%` template.
#[derive(Debug, Clone, PartialEq)]
pub enum PercentPiece {
    Literal(String),
    Spec {
        key: Option<String>,
        spec: FormatSpec,
        conversion: char,
    },
}

/// Split a `%` template into literals and conversion specs.
pub fn parse_percent(template: &str) -> Result<Vec<PercentPiece>, String> {
    let chars: Vec<char> = template.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let incomplete = || "incomplete format".to_string();

    while i < chars.len() {
        if chars[i] != '%' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            literal.push('%');
            i += 1;
            continue;
        }

        let mut key = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|c| *c == ')')
                .ok_or("incomplete format key")?;
            key = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }

        let mut spec = FormatSpec::default();
        let mut left = false;
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => left = true,
                '0' => spec.zero = true,
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                ' ' => {}
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            spec.width = digits.parse().map_err(|_| "width too big")?;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            spec.precision = Some(if digits.is_empty() {
                0
            } else {
                digits.parse().map_err(|_| "precision too big")?
            });
        }

        let conversion = *chars.get(i).ok_or_else(incomplete)?;
        i += 1;
        match conversion {
            'd' | 'i' | 'u' => spec.kind = Some('d'),
            'x' | 'X' | 'o' | 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | 'c' => {
                spec.kind = Some(conversion)
            }
            's' | 'r' | 'a' => {}
            other => {
                return Err(format!(
                    "unsupported format character '{}' (0x{:x})",
                    other, other as u32
                ))
            }
        }
        if left {
            spec.align = Some('<');
            spec.zero = false;
        } else if !spec.zero {
            spec.align = Some('>');
        }

        if !literal.is_empty() {
            pieces.push(PercentPiece::Literal(std::mem::take(&mut literal)));
        }
        pieces.push(PercentPiece::Spec {
            key,
            spec,
            conversion,
        });
    }
    if !literal.is_empty() {
        pieces.push(PercentPiece::Literal(literal));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(text: &str) -> FormatSpec {
        FormatSpec::parse(text).unwrap()
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(10.3), "10.3");
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1e15), "1000000000000000.0");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(f64::NAN), "nan");
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_str("'\""), "'\\'\"'");
        assert_eq!(quote_str("\x01"), "'\\x01'");
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.5), 2.0);
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.6), 3.0);
    }

    #[test]
    fn test_parse_spec() {
        let parsed = spec("*^+#010,.3f");
        assert_eq!(parsed.fill, '*');
        assert_eq!(parsed.align, Some('^'));
        assert_eq!(parsed.sign, '+');
        assert!(parsed.alternate);
        assert!(parsed.zero);
        assert_eq!(parsed.width, 10);
        assert_eq!(parsed.grouping, Some(','));
        assert_eq!(parsed.precision, Some(3));
        assert_eq!(parsed.kind, Some('f'));

        assert!(FormatSpec::parse(".f").is_err());
        assert!(FormatSpec::parse("ff").is_err());
    }

    #[test]
    fn test_format_int() {
        assert_eq!(format_int(42, &spec("")).unwrap(), "42");
        assert_eq!(format_int(42, &spec("5")).unwrap(), "   42");
        assert_eq!(format_int(42, &spec("<5")).unwrap(), "42   ");
        assert_eq!(format_int(-42, &spec("05")).unwrap(), "-0042");
        assert_eq!(format_int(255, &spec("#x")).unwrap(), "0xff");
        assert_eq!(format_int(5, &spec("b")).unwrap(), "101");
        assert_eq!(format_int(1234567, &spec(",")).unwrap(), "1,234,567");
        assert_eq!(format_int(7, &spec("+")).unwrap(), "+7");
        assert_eq!(format_int(3, &spec(".2f")).unwrap(), "3.00");
        assert!(format_int(3, &spec("s")).is_err());

        let big: BigInt = "-123456789012345678901234".parse().unwrap();
        assert_eq!(
            format_integer(&big, &spec(",")).unwrap(),
            "-123,456,789,012,345,678,901,234"
        );
        let big: BigInt = "18446744073709551616".parse().unwrap();
        assert_eq!(format_integer(&big, &spec("#x")).unwrap(), "0x10000000000000000");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.14159, &spec(".2f")).unwrap(), "3.14");
        assert_eq!(format_float(2.5, &spec("")).unwrap(), "2.5");
        assert_eq!(format_float(1234.5, &spec(".2e")).unwrap(), "1.23e+03");
        assert_eq!(format_float(0.25, &spec(".0%")).unwrap(), "25%");
        assert_eq!(format_float(1234567.891, &spec(",.2f")).unwrap(), "1,234,567.89");
        assert_eq!(format_float(0.0001234, &spec("g")).unwrap(), "0.0001234");
        assert_eq!(format_float(123456789.0, &spec("g")).unwrap(), "1.23457e+08");
        assert_eq!(format_float(1.0, &spec(".3")).unwrap(), "1.0");
        assert_eq!(format_float(-1.5, &spec("8.2f")).unwrap(), "   -1.50");
        assert_eq!(format_float(f64::INFINITY, &spec("f")).unwrap(), "inf");
    }

    #[test]
    fn test_format_str() {
        assert_eq!(format_str("ab", &spec("5")).unwrap(), "ab   ");
        assert_eq!(format_str("ab", &spec(">5")).unwrap(), "   ab");
        assert_eq!(format_str("ab", &spec("^6")).unwrap(), "  ab  ");
        assert_eq!(format_str("abcdef", &spec(".3")).unwrap(), "abc");
        assert!(format_str("ab", &spec("d")).is_err());
    }

    #[test]
    fn test_parse_format_string() {
        let pieces = parse_format_string("a{0}b{name!r:>4}{{}}").unwrap();
        assert_eq!(
            pieces,
            vec![
                FormatPiece::Literal("a".into()),
                FormatPiece::Field {
                    name: "0".into(),
                    conversion: None,
                    spec: String::new(),
                },
                FormatPiece::Literal("b".into()),
                FormatPiece::Field {
                    name: "name".into(),
                    conversion: Some('r'),
                    spec: ">4".into(),
                },
                FormatPiece::Literal("{}".into()),
            ]
        );
        assert!(parse_format_string("{").is_err());
        assert!(parse_format_string("}").is_err());
    }

    #[test]
    fn test_parse_percent() {
        let pieces = parse_percent("%-5d|%(x)s|%.2f%%").unwrap();
        assert_eq!(pieces.len(), 6);
        match &pieces[0] {
            PercentPiece::Spec {
                spec, conversion, ..
            } => {
                assert_eq!(*conversion, 'd');
                assert_eq!(spec.align, Some('<'));
                assert_eq!(spec.width, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&pieces[2], PercentPiece::Spec { key: Some(k), .. } if k == "x"));
        assert_eq!(pieces[5], PercentPiece::Literal("%".into()));
        assert!(parse_percent("%").is_err());
        assert!(parse_percent("%y").is_err());
    }
}
