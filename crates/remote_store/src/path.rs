use serde_json::{Map, Value};

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn get_at(root: &Value, segs: &[&str]) -> Value {
    let mut current = root;
    for seg in segs {
        match current.get(*seg) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Writes `value` at `segs`, creating intermediate objects. `Null` deletes.
pub fn set_at(root: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for seg in parents {
        if !current.is_object() {
            if value.is_null() {
                return;
            }
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        if value.is_null() {
            return;
        }
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
    }
}

/// Applies each key of `fields` below `segs`. Keys may themselves be
/// slash-separated relative paths.
pub fn merge_at(root: &mut Value, segs: &[&str], fields: &Map<String, Value>) {
    for (key, value) in fields {
        let mut target: Vec<&str> = segs.to_vec();
        target.extend(segments(key));
        set_at(root, &target, value.clone());
    }
}

/// Whether a write at `written` can change the value observed at `observed`.
pub(crate) fn overlaps(written: &[&str], observed: &[&str]) -> bool {
    written
        .iter()
        .zip(observed.iter())
        .all(|(left, right)| left == right)
}
