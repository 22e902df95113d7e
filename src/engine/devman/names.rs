// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Functions for dealing with device-mapper layer names.
//
// Layer names are of the form <vg>-<lv>[-<layer>]; any hyphen appearing
// inside a component is quoted with a second hyphen. The top layer of a
// device omits the layer component, eg. vg0-lvol0.

/// Append `component` to `out`, doubling every literal hyphen.
fn quote_hyphens(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == '-' {
            out.push('-');
        }
        out.push(c);
    }
}

/// Encode a `<vg>-<lv>[-<layer>]` node name. An empty layer is treated
/// the same as no layer at all.
pub fn build_name(vg: &str, lv: &str, layer: Option<&str>) -> String {
    let layer = layer.filter(|layer| !layer.is_empty());
    let mut name =
        String::with_capacity(vg.len() + lv.len() + layer.map_or(0, str::len) + 8);
    quote_hyphens(&mut name, vg);
    name.push('-');
    quote_hyphens(&mut name, lv);
    if let Some(layer) = layer {
        name.push('-');
        quote_hyphens(&mut name, layer);
    }
    name
}

/// Whether a kernel node name can belong to the named VG.
///
/// The name must start with the quoted encoding of the VG name followed
/// by a single separator hyphen. A doubled hyphen at that position is a
/// quoted literal, meaning the node's first component is longer than the
/// VG name, so the node belongs to some other VG.
pub fn belongs_to_vg(vg: &str, name: &str) -> bool {
    let mut prefix = String::with_capacity(vg.len() * 2);
    quote_hyphens(&mut prefix, vg);

    let rest = match name.strip_prefix(prefix.as_str()) {
        Some(rest) => rest,
        None => return false,
    };

    let mut chars = rest.chars();
    chars.next() == Some('-') && chars.next() != Some('-')
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Undo the hyphen quoting: split on single hyphens, folding doubled
    /// hyphens back into their component.
    fn split_name(name: &str) -> Vec<String> {
        let mut parts = vec![String::new()];
        let mut chars = name.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '-' {
                if chars.peek() == Some(&'-') {
                    chars.next();
                    parts.last_mut().expect("parts is never empty").push('-');
                } else {
                    parts.push(String::new());
                }
            } else {
                parts.last_mut().expect("parts is never empty").push(c);
            }
        }
        parts
    }

    #[test]
    fn test_build_name() {
        assert_eq!(build_name("vg0", "lvol0", None), "vg0-lvol0");
        assert_eq!(build_name("vg0", "lvol0", Some("real")), "vg0-lvol0-real");
        assert_eq!(build_name("vg0", "snap0", Some("cow")), "vg0-snap0-cow");
        // An empty layer is no layer.
        assert_eq!(build_name("vg0", "lvol0", Some("")), "vg0-lvol0");
    }

    #[test]
    fn test_build_name_quotes_hyphens() {
        assert_eq!(build_name("my-vg", "lv-0", None), "my--vg-lv--0");
        assert_eq!(
            build_name("my-vg", "lv-0", Some("real")),
            "my--vg-lv--0-real"
        );
    }

    #[test]
    fn test_belongs_to_vg() {
        assert!(belongs_to_vg("vg0", "vg0-lvol0"));
        assert!(belongs_to_vg("vg0", "vg0-lvol0-real"));
        assert!(belongs_to_vg("my-vg", "my--vg-lv--0"));

        // A shared prefix is not membership.
        assert!(!belongs_to_vg("vg", "vg1-lvol0"));
        // A doubled hyphen after the prefix means the first component
        // continues; "vg--a-b" is LV "b" in VG "vg-a".
        assert!(!belongs_to_vg("vg", "vg--a-b"));
        assert!(belongs_to_vg("vg-a", "vg--a-b"));
        // The bare VG name is not a layer name.
        assert!(!belongs_to_vg("vg0", "vg0"));
        assert!(!belongs_to_vg("vg0", "other-lvol0"));
    }

    // Component names may not begin with a hyphen; the quoting scheme
    // cannot distinguish "a" + "-b" from "a-" + "b".
    fn component() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9._-]{0,10}[a-z0-9.]|[a-z0-9]"
    }

    proptest! {
        #[test]
        fn round_trip(vg in component(), lv in component(), layer in proptest::option::of(component())) {
            let name = build_name(&vg, &lv, layer.as_deref());
            let parts = split_name(&name);
            match layer {
                Some(ref layer) => prop_assert_eq!(parts, vec![vg, lv, layer.clone()]),
                None => prop_assert_eq!(parts, vec![vg, lv]),
            }
        }

        #[test]
        fn belongs_soundness(vg in component(), lv in component(), layer in proptest::option::of(component())) {
            let name = build_name(&vg, &lv, layer.as_deref());
            prop_assert!(belongs_to_vg(&vg, &name));
        }
    }
}
