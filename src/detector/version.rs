//! Package version comparators.
//!
//! Each ecosystem defines its own partial order. These are pure
//! functions over version strings; drivers pick the comparator that
//! matches their package format.

use std::cmp::Ordering;

// ─── RPM ─────────────────────────────────────────────────────────────

/// Compare full RPM EVR strings (`[epoch:]version[-release]`).
pub fn compare_rpm(a: &str, b: &str) -> Ordering {
    let (ae, av, ar) = parse_evr(a);
    let (be, bv, br) = parse_evr(b);
    ae.cmp(&be)
        .then_with(|| rpmvercmp(av, bv))
        .then_with(|| {
            // A missing release matches any release.
            if ar.is_empty() || br.is_empty() {
                Ordering::Equal
            } else {
                rpmvercmp(ar, br)
            }
        })
}

fn parse_evr(s: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match s.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, s),
    };
    let (version, release) = match rest.split_once('-') {
        Some((v, r)) => (v, r),
        None => (rest, ""),
    };
    (epoch, version, release)
}

/// The rpm segment comparison: alternating numeric and alphabetic
/// segments, `~` sorting before everything and `^` right after the
/// common prefix.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    while !one.is_empty() || !two.is_empty() {
        while one.first().is_some_and(|&c| is_sep(c)) {
            one = &one[1..];
        }
        while two.first().is_some_and(|&c| is_sep(c)) {
            two = &two[1..];
        }

        let t1 = one.first() == Some(&b'~');
        let t2 = two.first() == Some(&b'~');
        if t1 || t2 {
            if !t1 {
                return Ordering::Greater;
            }
            if !t2 {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        let c1 = one.first() == Some(&b'^');
        let c2 = two.first() == Some(&b'^');
        if c1 || c2 {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if !c1 {
                return Ordering::Greater;
            }
            if !c2 {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = take_segment(one, numeric);
        let (seg2, rest2) = take_segment(two, two[0].is_ascii_digit());

        if numeric != two[0].is_ascii_digit() {
            // A numeric segment is always newer than an alphabetic one.
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let cmp = if numeric {
            let s1 = trim_leading_zeros(seg1);
            let s2 = trim_leading_zeros(seg2);
            s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2))
        } else {
            seg1.cmp(seg2)
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
        one = rest1;
        two = rest2;
    }

    one.len().cmp(&two.len())
}

fn take_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let end = s
        .iter()
        .position(|&c| {
            if numeric {
                !c.is_ascii_digit()
            } else {
                !c.is_ascii_alphabetic()
            }
        })
        .unwrap_or(s.len());
    s.split_at(end)
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
    &s[start..]
}

// ─── Debian ──────────────────────────────────────────────────────────

/// Compare Debian package versions (`[epoch:]upstream[-revision]`).
pub fn compare_deb(a: &str, b: &str) -> Ordering {
    let (ae, au, ar) = parse_deb(a);
    let (be, bu, br) = parse_deb(b);
    ae.cmp(&be)
        .then_with(|| deb_verrevcmp(au, bu))
        .then_with(|| deb_verrevcmp(ar, br))
}

fn parse_deb(s: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match s.split_once(':') {
        Some((e, rest)) if e.bytes().all(|c| c.is_ascii_digit()) && !e.is_empty() => {
            (e.parse().unwrap_or(0), rest)
        }
        _ => (0, s),
    };
    // The revision cannot contain '-', the upstream version can.
    let (upstream, revision) = match rest.rsplit_once('-') {
        Some((u, r)) => (u, r),
        None => (rest, ""),
    };
    (epoch, upstream, revision)
}

/// dpkg's character order: `~` before end-of-string, letters before
/// everything else.
fn deb_char_order(c: u8) -> i32 {
    match c {
        b'~' => -1,
        c if c.is_ascii_alphabetic() => c as i32,
        0 => 0,
        c => c as i32 + 256,
    }
}

fn deb_verrevcmp(a: &str, b: &str) -> Ordering {
    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        // Non-digit prefix.
        while one.first().is_some_and(|c| !c.is_ascii_digit())
            || two.first().is_some_and(|c| !c.is_ascii_digit())
        {
            let c1 = one.first().copied().unwrap_or(0);
            let c2 = two.first().copied().unwrap_or(0);
            if c1.is_ascii_digit() && c2.is_ascii_digit() {
                break;
            }
            let cmp = deb_char_order(if c1.is_ascii_digit() { 0 } else { c1 })
                .cmp(&deb_char_order(if c2.is_ascii_digit() { 0 } else { c2 }));
            if cmp != Ordering::Equal {
                return cmp;
            }
            if c1 != 0 {
                one = &one[1..];
            }
            if c2 != 0 {
                two = &two[1..];
            }
            if one.is_empty() && two.is_empty() {
                return Ordering::Equal;
            }
        }

        // Numeric part.
        let (n1, rest1) = take_segment(one, true);
        let (n2, rest2) = take_segment(two, true);
        let s1 = trim_leading_zeros(n1);
        let s2 = trim_leading_zeros(n2);
        let cmp = s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2));
        if cmp != Ordering::Equal {
            return cmp;
        }
        one = rest1;
        two = rest2;
        if one.is_empty() && two.is_empty() {
            break;
        }
    }
    Ordering::Equal
}

// ─── Alpine ──────────────────────────────────────────────────────────

fn apk_suffix_rank(suffix: &str) -> i32 {
    match suffix {
        "alpha" => -4,
        "beta" => -3,
        "pre" => -2,
        "rc" => -1,
        "p" => 1,
        _ => 0,
    }
}

/// Compare Alpine package versions
/// (`digits(.digits)*[letter][_suffix[num]]*[-r<num>]`).
pub fn compare_apk(a: &str, b: &str) -> Ordering {
    let (abase, arel) = split_apk_release(a);
    let (bbase, brel) = split_apk_release(b);

    let mut aparts = abase.split('_');
    let mut bparts = bbase.split('_');
    let acore = aparts.next().unwrap_or("");
    let bcore = bparts.next().unwrap_or("");

    let cmp = compare_apk_core(acore, bcore);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Suffix chains: `1.2_alpha1` < `1.2` < `1.2_p1`.
    loop {
        match (aparts.next(), bparts.next()) {
            (None, None) => break,
            (sa, sb) => {
                let (ra, na) = split_apk_suffix(sa.unwrap_or(""));
                let (rb, nb) = split_apk_suffix(sb.unwrap_or(""));
                let ra = if sa.is_none() { 0 } else { apk_suffix_rank(ra) };
                let rb = if sb.is_none() { 0 } else { apk_suffix_rank(rb) };
                let cmp = ra.cmp(&rb).then_with(|| na.cmp(&nb));
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
        }
    }

    arel.cmp(&brel)
}

fn split_apk_release(s: &str) -> (&str, u64) {
    match s.rsplit_once("-r") {
        Some((base, rel)) if rel.bytes().all(|c| c.is_ascii_digit()) && !rel.is_empty() => {
            (base, rel.parse().unwrap_or(0))
        }
        _ => (s, 0),
    }
}

fn split_apk_suffix(s: &str) -> (&str, u64) {
    let end = s
        .bytes()
        .position(|c| c.is_ascii_digit())
        .unwrap_or(s.len());
    let (name, num) = s.split_at(end);
    (name, num.parse().unwrap_or(0))
}

fn compare_apk_core(a: &str, b: &str) -> Ordering {
    let mut ap = a.split('.');
    let mut bp = b.split('.');
    loop {
        match (ap.next(), bp.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let (xn, xa) = split_apk_suffix_letter(x);
                let (yn, ya) = split_apk_suffix_letter(y);
                let cmp = xn.cmp(&yn).then_with(|| xa.cmp(ya));
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
        }
    }
}

fn split_apk_suffix_letter(s: &str) -> (u64, &str) {
    let end = s
        .bytes()
        .position(|c| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, rest) = s.split_at(end);
    (num.parse().unwrap_or(0), rest)
}

// ─── Semver-ish (npm) ────────────────────────────────────────────────

/// Compare npm-style versions: dotted numerics with an optional
/// pre-release tail, which sorts before the release it precedes.
pub fn compare_semver(a: &str, b: &str) -> Ordering {
    let (acore, apre) = split_prerelease(a.trim_start_matches('v'));
    let (bcore, bpre) = split_prerelease(b.trim_start_matches('v'));

    let mut ap = acore.split('.');
    let mut bp = bcore.split('.');
    loop {
        match (ap.next(), bp.next()) {
            (None, None) => break,
            (x, y) => {
                let xn: u64 = x.unwrap_or("0").parse().unwrap_or(0);
                let yn: u64 = y.unwrap_or("0").parse().unwrap_or(0);
                let cmp = xn.cmp(&yn);
                if cmp != Ordering::Equal {
                    return cmp;
                }
                if x.is_none() && y.is_none() {
                    break;
                }
            }
        }
    }

    match (apre, bpre) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(x), Some(y)) => compare_prerelease(x, y),
    }
}

fn split_prerelease(s: &str) -> (&str, Option<&str>) {
    // Build metadata never orders versions.
    let s = s.split_once('+').map(|(v, _)| v).unwrap_or(s);
    match s.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (s, None),
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut ap = a.split('.');
    let mut bp = b.split('.');
    loop {
        match (ap.next(), bp.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let cmp = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(xn), Ok(yn)) => xn.cmp(&yn),
                    // Numeric identifiers sort below alphanumeric ones.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpm_basic_ordering() {
        assert_eq!(compare_rpm("1.2.3-1", "1.2.3-1"), Ordering::Equal);
        assert_eq!(compare_rpm("1.2.2-1", "1.2.3-1"), Ordering::Less);
        assert_eq!(compare_rpm("1.2.10-1", "1.2.9-1"), Ordering::Greater);
        assert_eq!(compare_rpm("1.2.3-1", "1.2.3-2"), Ordering::Less);
    }

    #[test]
    fn rpm_epoch_dominates() {
        assert_eq!(compare_rpm("1:1.0-1", "2.0-1"), Ordering::Greater);
        assert_eq!(compare_rpm("0:1.0-1", "1.0-1"), Ordering::Equal);
    }

    #[test]
    fn rpm_tilde_sorts_before_release() {
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~~", "1.0~"), Ordering::Less);
    }

    #[test]
    fn rpm_caret_sorts_after_base() {
        assert_eq!(rpmvercmp("1.0^", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0^git1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn rpm_alpha_vs_numeric_segments() {
        assert_eq!(rpmvercmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0a", "1.01"), Ordering::Less);
        assert_eq!(rpmvercmp("fc33", "fc34"), Ordering::Less);
        assert_eq!(rpmvercmp("1.001", "1.1"), Ordering::Equal);
    }

    #[test]
    fn rpm_missing_release_matches_any() {
        assert_eq!(compare_rpm("1.2.3", "1.2.3-9"), Ordering::Equal);
    }

    #[test]
    fn deb_ordering() {
        assert_eq!(compare_deb("1.1.1n-0+deb11u4", "1.1.1n-0+deb11u5"), Ordering::Less);
        assert_eq!(compare_deb("2.36-9", "2.36-9"), Ordering::Equal);
        assert_eq!(compare_deb("1:0.5.11", "0.9"), Ordering::Greater);
        assert_eq!(compare_deb("5.1-2+deb11u1", "5.1-2"), Ordering::Greater);
    }

    #[test]
    fn deb_tilde_is_earlier_than_anything() {
        assert_eq!(compare_deb("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(compare_deb("1.0~rc1-1", "1.0-1"), Ordering::Less);
        assert_eq!(compare_deb("1.0", "1.0a"), Ordering::Less);
    }

    #[test]
    fn apk_ordering() {
        assert_eq!(compare_apk("1.2.3-r4", "1.2.3-r5"), Ordering::Less);
        assert_eq!(compare_apk("1.2.3-r4", "1.2.3-r4"), Ordering::Equal);
        assert_eq!(compare_apk("1.2.4-r0", "1.2.3-r9"), Ordering::Greater);
        assert_eq!(compare_apk("3.0.8-r3", "3.0.10-r0"), Ordering::Less);
    }

    #[test]
    fn apk_suffixes() {
        assert_eq!(compare_apk("1.2_alpha1", "1.2"), Ordering::Less);
        assert_eq!(compare_apk("1.2_rc1", "1.2_alpha2"), Ordering::Greater);
        assert_eq!(compare_apk("1.2_p1", "1.2"), Ordering::Greater);
        assert_eq!(compare_apk("1.2a", "1.2b"), Ordering::Less);
    }

    #[test]
    fn semver_ordering() {
        assert_eq!(compare_semver("2.0.0", "2.1.1"), Ordering::Less);
        assert_eq!(compare_semver("2.1.1", "2.1.1"), Ordering::Equal);
        assert_eq!(compare_semver("10.0.0", "9.9.9"), Ordering::Greater);
        assert_eq!(compare_semver("1.2", "1.2.0"), Ordering::Equal);
    }

    #[test]
    fn semver_prerelease_sorts_before_release() {
        assert_eq!(compare_semver("1.0.0-beta.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_semver("1.0.0-beta.1", "1.0.0-beta.2"), Ordering::Less);
        assert_eq!(compare_semver("1.0.0-1", "1.0.0-alpha"), Ordering::Less);
        assert_eq!(compare_semver("1.0.0+build5", "1.0.0"), Ordering::Equal);
    }
}
