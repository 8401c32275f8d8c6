//! Document optimizations over the glTF JSON and the GLB binary chunk.
//!
//! References are plain indices, so every removal or merge is followed by a
//! remap of the collections that point at it. Buffer data is only rewritten
//! for the GLB-embedded buffer (buffer 0 without a `uri`); external buffers
//! are left as they are.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Extension that allows integer vertex attributes
pub const KHR_MESH_QUANTIZATION: &str = "KHR_mesh_quantization";

const ARRAY_BUFFER: u64 = 34962;
const ELEMENT_ARRAY_BUFFER: u64 = 34963;

const SHORT: u64 = 5122;
const UNSIGNED_SHORT: u64 = 5123;
const UNSIGNED_INT: u64 = 5125;
const FLOAT: u64 = 5126;

/// Root extensions known not to index nodes
const NODE_SAFE_EXTENSIONS: [&str; 2] = ["KHR_lights_punctual", "KHR_materials_variants"];

/// Index-bearing collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Nodes,
    Meshes,
    Skins,
    Materials,
    Textures,
    Images,
    Samplers,
    Accessors,
    BufferViews,
    Buffers,
}

impl Collection {
    /// Users before used, so removing a user can orphan what it used
    const PRUNE_ORDER: [Collection; 6] = [
        Collection::Meshes,
        Collection::Skins,
        Collection::Materials,
        Collection::Textures,
        Collection::Images,
        Collection::Samplers,
    ];

    /// Leaves first, so merging them can make their users identical
    const DEDUP_ORDER: [Collection; 4] = [
        Collection::Samplers,
        Collection::Images,
        Collection::Textures,
        Collection::Materials,
    ];

    fn key(&self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::Meshes => "meshes",
            Collection::Skins => "skins",
            Collection::Materials => "materials",
            Collection::Textures => "textures",
            Collection::Images => "images",
            Collection::Samplers => "samplers",
            Collection::Accessors => "accessors",
            Collection::BufferViews => "bufferViews",
            Collection::Buffers => "buffers",
        }
    }
}

/// Remove nodes outside the scenes and every entry nothing refers to, then
/// repack the binary chunk. Returns the number of entries removed.
pub fn prune(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    let mut removed = prune_nodes(root);
    for collection in Collection::PRUNE_ORDER {
        removed += prune_unreferenced(root, collection);
    }
    removed + compact(root, bin)
}

/// Merge structurally identical entries (names ignored) and accessors with
/// identical data. Returns the number of entries merged away.
pub fn dedup(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    let mut merged = 0;

    for collection in Collection::DEDUP_ORDER {
        let canonical = json_canonical(root, collection);
        merged += merge(root, collection, &canonical);
    }

    let canonical = accessor_canonical(root, bin.as_deref());
    merged += merge(root, Collection::Accessors, &canonical);

    // meshes can only match once their accessors are shared
    let canonical = json_canonical(root, Collection::Meshes);
    merged += merge(root, Collection::Meshes, &canonical);

    if merged > 0 {
        compact(root, bin);
    }
    merged
}

/// Narrow 32-bit index buffers to 16 bits where every index fits. Returns
/// the number of accessors rewritten.
pub fn compress(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    let Some(data) = bin.clone() else {
        return 0;
    };

    let mut narrowed = 0;
    for (index, uses) in accessor_usage(root) {
        if !uses.iter().all(|u| *u == Usage::Indices) {
            continue;
        }
        let Some(bytes) = narrow_indices(root, &data, index) else {
            continue;
        };
        let Some(view) = append_view(root, bin, &bytes, None, ELEMENT_ARRAY_BUFFER) else {
            continue;
        };
        if let Some(accessor) = accessor_mut(root, index) {
            accessor.insert("bufferView".to_string(), Value::from(view));
            accessor.insert("componentType".to_string(), Value::from(UNSIGNED_SHORT));
            accessor.remove("byteOffset");
        }
        narrowed += 1;
    }

    if narrowed > 0 {
        compact(root, bin);
    }
    narrowed
}

/// Store normals, tangents and texture coordinates as normalized integers
/// (KHR_mesh_quantization). Returns the number of accessors rewritten.
pub fn quantize(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    let Some(data) = bin.clone() else {
        return 0;
    };

    let mut quantized = 0;
    for (index, uses) in accessor_usage(root) {
        let Some(Usage::Attribute(semantic)) = uses.first() else {
            continue;
        };
        if uses.iter().any(|u| u != &uses[0]) {
            continue;
        }
        let Some(encoded) = encode_attribute(root, &data, index, semantic) else {
            continue;
        };
        let Some(view) = append_view(root, bin, &encoded.bytes, Some(encoded.stride), ARRAY_BUFFER)
        else {
            continue;
        };
        if let Some(accessor) = accessor_mut(root, index) {
            accessor.insert("bufferView".to_string(), Value::from(view));
            accessor.insert(
                "componentType".to_string(),
                Value::from(encoded.component_type),
            );
            accessor.insert("normalized".to_string(), Value::Bool(true));
            accessor.remove("byteOffset");
            accessor.remove("min");
            accessor.remove("max");
        }
        quantized += 1;
    }

    if quantized > 0 {
        require_extension(root, KHR_MESH_QUANTIZATION);
        compact(root, bin);
    }
    quantized
}

/// Keep the nodes reachable from a scene or a skin; drop the rest along with
/// animation channels that target them.
fn prune_nodes(root: &mut Map<String, Value>) -> usize {
    let foreign = root
        .get("extensions")
        .and_then(Value::as_object)
        .is_some_and(|e| e.keys().any(|k| !NODE_SAFE_EXTENSIONS.contains(&k.as_str())));
    if foreign {
        tracing::debug!("document carries extensions that may index nodes; nodes kept");
        return 0;
    }

    let mut stack: Vec<usize> = entries(root, "scenes")
        .flat_map(|scene| indices(scene.get("nodes")))
        .collect();
    if stack.is_empty() {
        return 0;
    }
    for skin in entries(root, "skins") {
        stack.extend(indices(skin.get("joints")));
        stack.extend(skin.get("skeleton").and_then(Value::as_u64).map(|i| i as usize));
    }

    let nodes: Vec<&Value> = entries(root, "nodes").collect();
    let mut keep = BTreeSet::new();
    while let Some(i) = stack.pop() {
        let Some(node) = nodes.get(i) else {
            continue;
        };
        if keep.insert(i) {
            stack.extend(indices(node.get("children")));
        }
    }
    if keep.len() == nodes.len() {
        return 0;
    }

    drop_animation_channels(root, &keep);
    let Some(mapping) = retain(root, Collection::Nodes.key(), &keep) else {
        return 0;
    };
    remap(root, Collection::Nodes, &mapping);
    mapping.iter().filter(|m| m.is_none()).count()
}

fn drop_animation_channels(root: &mut Map<String, Value>, keep: &BTreeSet<usize>) {
    let Some(animations) = root.get_mut("animations").and_then(Value::as_array_mut) else {
        return;
    };

    for animation in animations.iter_mut() {
        let Some(animation) = animation.as_object_mut() else {
            continue;
        };
        if let Some(channels) = animation.get_mut("channels").and_then(Value::as_array_mut) {
            channels.retain(|channel| {
                channel
                    .pointer("/target/node")
                    .and_then(Value::as_u64)
                    .map_or(true, |node| keep.contains(&(node as usize)))
            });
        }
        prune_animation_samplers(animation);
    }

    animations.retain(|animation| {
        animation
            .get("channels")
            .and_then(Value::as_array)
            .is_some_and(|channels| !channels.is_empty())
    });
    let empty = animations.is_empty();
    if empty {
        root.remove("animations");
    }
}

fn prune_animation_samplers(animation: &mut Map<String, Value>) {
    let used: BTreeSet<usize> = animation
        .get("channels")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|channel| channel.get("sampler").and_then(Value::as_u64))
        .map(|i| i as usize)
        .collect();

    let Some(mapping) = retain(animation, "samplers", &used) else {
        return;
    };
    for channel in entries_mut(animation, "channels") {
        if let Some(index) = channel.get_mut("sampler") {
            remap_index(index, &mapping);
        }
    }
}

fn prune_unreferenced(root: &mut Map<String, Value>, collection: Collection) -> usize {
    let used = referenced(root, collection);
    let Some(mapping) = retain(root, collection.key(), &used) else {
        return 0;
    };
    remap(root, collection, &mapping);
    mapping.iter().filter(|m| m.is_none()).count()
}

/// Drop unused accessors, views and buffers, then repack the GLB buffer.
/// Returns the number of entries removed.
fn compact(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    let mut removed = prune_unreferenced(root, Collection::Accessors)
        + prune_unreferenced(root, Collection::BufferViews);

    let embedded = is_glb_buffer(root, 0);
    let used = referenced(root, Collection::Buffers);
    if let Some(mapping) = retain(root, Collection::Buffers.key(), &used) {
        removed += mapping.iter().filter(|m| m.is_none()).count();
        remap(root, Collection::Buffers, &mapping);
        if embedded && mapping.first() == Some(&None) {
            *bin = None;
        }
    }

    let reclaimed = repack(root, bin);
    if reclaimed > 0 {
        tracing::debug!("binary chunk repacked, {} bytes reclaimed", reclaimed);
    }
    removed
}

/// Copy the views of the GLB buffer back to back, keeping each view's
/// 4-byte alignment phase. Returns the number of bytes reclaimed.
fn repack(root: &mut Map<String, Value>, bin: &mut Option<Vec<u8>>) -> usize {
    if !is_glb_buffer(root, 0) {
        return 0;
    }
    let Some(data) = bin.as_deref() else {
        return 0;
    };

    let mut packed = Vec::with_capacity(data.len());
    let mut offsets = Vec::new();
    for (i, view) in entries(root, "bufferViews").enumerate() {
        if uint(view, "buffer") != Some(0) {
            continue;
        }
        let offset = uint(view, "byteOffset").unwrap_or(0);
        let chunk = uint(view, "byteLength")
            .and_then(|length| offset.checked_add(length))
            .and_then(|end| data.get(offset..end));
        let Some(chunk) = chunk else {
            tracing::warn!("buffer view {} lies outside the binary chunk; not repacked", i);
            return 0;
        };

        while packed.len() % 4 != offset % 4 {
            packed.push(0);
        }
        offsets.push((i, packed.len()));
        packed.extend_from_slice(chunk);
    }
    pad(&mut packed);

    let reclaimed = data.len().saturating_sub(packed.len());
    if reclaimed == 0 {
        return 0;
    }

    for (i, offset) in offsets {
        if let Some(view) = root
            .get_mut("bufferViews")
            .and_then(|views| views.get_mut(i))
            .and_then(Value::as_object_mut)
        {
            view.insert("byteOffset".to_string(), Value::from(offset));
        }
    }
    set_buffer_length(root, packed.len());
    *bin = Some(packed);
    reclaimed
}

fn json_canonical(root: &Map<String, Value>, collection: Collection) -> Vec<usize> {
    let comparable: Vec<Value> = entries(root, collection.key()).map(without_name).collect();
    (0..comparable.len())
        .map(|i| {
            (0..i)
                .find(|&j| comparable[j] == comparable[i])
                .unwrap_or(i)
        })
        .collect()
}

/// Accessors with the same description and element bytes share an index
fn accessor_canonical(root: &Map<String, Value>, data: Option<&[u8]>) -> Vec<usize> {
    let mut seen: HashMap<(String, Vec<u8>), usize> = HashMap::new();
    entries(root, "accessors")
        .enumerate()
        .map(|(i, accessor)| match data.and_then(|d| accessor_key(root, d, accessor)) {
            Some(key) => *seen.entry(key).or_insert(i),
            None => i,
        })
        .collect()
}

fn accessor_key(root: &Map<String, Value>, data: &[u8], accessor: &Value) -> Option<(String, Vec<u8>)> {
    let elements = accessor_elements(root, data, accessor)?;

    let mut description = without_name(accessor);
    if let Some(map) = description.as_object_mut() {
        map.remove("bufferView");
        map.remove("byteOffset");
    }
    // index data must stay on an index view
    let target = view_of(root, accessor).and_then(|view| view.get("target"));
    let description = format!("{}|{}", description, target.unwrap_or(&Value::Null));

    Some((description, elements.concat()))
}

/// Point every reference at its canonical entry and drop the duplicates
fn merge(root: &mut Map<String, Value>, collection: Collection, canonical: &[usize]) -> usize {
    let keep: BTreeSet<usize> = canonical.iter().copied().collect();
    if keep.len() == canonical.len() {
        return 0;
    }

    let to_canonical: Vec<Option<usize>> = canonical.iter().copied().map(Some).collect();
    remap(root, collection, &to_canonical);
    if let Some(mapping) = retain(root, collection.key(), &keep) {
        remap(root, collection, &mapping);
    }
    canonical.len() - keep.len()
}

fn without_name(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("name");
    }
    value
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Usage {
    Indices,
    Attribute(String),
    Other,
}

/// How each accessor is used across the document
fn accessor_usage(root: &Map<String, Value>) -> BTreeMap<usize, Vec<Usage>> {
    let mut usage: BTreeMap<usize, Vec<Usage>> = BTreeMap::new();
    let mut record = |index: Option<&Value>, kind: Usage| {
        if let Some(i) = index.and_then(Value::as_u64) {
            usage.entry(i as usize).or_default().push(kind);
        }
    };

    for primitive in entries(root, "meshes").flat_map(|mesh| entries_of(mesh, "primitives")) {
        let attributes = primitive.get("attributes").and_then(Value::as_object);
        for (semantic, index) in attributes.into_iter().flatten() {
            record(Some(index), Usage::Attribute(semantic.clone()));
        }
        record(primitive.get("indices"), Usage::Indices);
        for target in entries_of(primitive, "targets") {
            for index in target.as_object().into_iter().flat_map(|t| t.values()) {
                record(Some(index), Usage::Other);
            }
        }
    }
    for skin in entries(root, "skins") {
        record(skin.get("inverseBindMatrices"), Usage::Other);
    }
    for sampler in entries(root, "animations").flat_map(|a| entries_of(a, "samplers")) {
        record(sampler.get("input"), Usage::Other);
        record(sampler.get("output"), Usage::Other);
    }
    for node in entries(root, "nodes") {
        let instancing = node.pointer("/extensions/EXT_mesh_gpu_instancing/attributes");
        for index in instancing.and_then(Value::as_object).into_iter().flat_map(|a| a.values()) {
            record(Some(index), Usage::Other);
        }
    }

    usage
}

fn narrow_indices(root: &Map<String, Value>, data: &[u8], index: usize) -> Option<Vec<u8>> {
    let accessor = entries(root, "accessors").nth(index)?;
    if accessor.get("componentType")?.as_u64()? != UNSIGNED_INT
        || accessor.get("type")?.as_str()? != "SCALAR"
    {
        return None;
    }

    let elements = accessor_elements(root, data, accessor)?;
    if elements.is_empty() {
        return None;
    }

    let mut bytes = Vec::with_capacity(elements.len() * 2);
    for element in elements {
        let value = u32::from_le_bytes(element.try_into().ok()?);
        // 0xFFFF is the primitive restart value for 16-bit indices
        let value = u16::try_from(value).ok().filter(|&v| v != u16::MAX)?;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Some(bytes)
}

struct Encoded {
    bytes: Vec<u8>,
    stride: usize,
    component_type: u64,
}

fn encode_attribute(
    root: &Map<String, Value>,
    data: &[u8],
    index: usize,
    semantic: &str,
) -> Option<Encoded> {
    let accessor = entries(root, "accessors").nth(index)?;
    if accessor.get("componentType")?.as_u64()? != FLOAT {
        return None;
    }
    let kind = accessor.get("type")?.as_str()?;

    let elements = accessor_elements(root, data, accessor)?;
    if elements.is_empty() {
        return None;
    }
    let values: Vec<Vec<f32>> = elements
        .iter()
        .map(|element| {
            element
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
        .collect();

    match (semantic, kind) {
        ("NORMAL", "VEC3") | ("TANGENT", "VEC4") => {
            let mut bytes = Vec::with_capacity(values.len() * 8);
            for element in &values {
                for &v in element {
                    bytes.extend_from_slice(&snorm16(v).to_le_bytes());
                }
                // vertex attributes stay 4-byte aligned
                bytes.resize(bytes.len().next_multiple_of(4), 0);
            }
            Some(Encoded {
                bytes,
                stride: 8,
                component_type: SHORT,
            })
        }
        (semantic, "VEC2") if semantic.starts_with("TEXCOORD_") => {
            let in_range = values.iter().flatten().all(|v| (0.0..=1.0).contains(v));
            if !in_range {
                return None;
            }
            let bytes = values
                .iter()
                .flatten()
                .flat_map(|&v| unorm16(v).to_le_bytes())
                .collect();
            Some(Encoded {
                bytes,
                stride: 4,
                component_type: UNSIGNED_SHORT,
            })
        }
        _ => None,
    }
}

fn snorm16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn unorm16(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// Append `bytes` to the GLB buffer as a new view. Returns the view index.
fn append_view(
    root: &mut Map<String, Value>,
    bin: &mut Option<Vec<u8>>,
    bytes: &[u8],
    stride: Option<usize>,
    target: u64,
) -> Option<usize> {
    if !is_glb_buffer(root, 0) || !root.get("bufferViews").is_some_and(Value::is_array) {
        return None;
    }
    let data = bin.as_mut()?;

    pad(data);
    let offset = data.len();
    data.extend_from_slice(bytes);
    let length = data.len();

    set_buffer_length(root, length);

    let mut view = json!({
        "buffer": 0,
        "byteOffset": offset,
        "byteLength": bytes.len(),
        "target": target,
    });
    if let Some(stride) = stride {
        view["byteStride"] = Value::from(stride);
    }

    let views = root.get_mut("bufferViews")?.as_array_mut()?;
    views.push(view);
    Some(views.len() - 1)
}

fn require_extension(root: &mut Map<String, Value>, name: &str) {
    for key in ["extensionsUsed", "extensionsRequired"] {
        let list = root
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(items) = list.as_array_mut() {
            if !items.iter().any(|item| item.as_str() == Some(name)) {
                items.push(Value::from(name));
            }
        }
    }
}

struct Layout {
    start: usize,
    stride: usize,
    element: usize,
    count: usize,
}

/// Where an accessor's elements live in the GLB buffer, when they can be
/// read directly (no sparse storage, no external buffer)
fn accessor_layout(root: &Map<String, Value>, accessor: &Value, data_len: usize) -> Option<Layout> {
    if accessor.get("sparse").is_some() {
        return None;
    }
    let view = view_of(root, accessor)?;
    if uint(view, "buffer")? != 0 || !is_glb_buffer(root, 0) {
        return None;
    }

    let kind = accessor.get("type")?.as_str()?;
    let components = match kind {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" | "MAT2" => 4,
        "MAT3" => 9,
        "MAT4" => 16,
        _ => return None,
    };
    let size = match accessor.get("componentType")?.as_u64()? {
        5120 | 5121 => 1,
        SHORT | UNSIGNED_SHORT => 2,
        UNSIGNED_INT | FLOAT => 4,
        _ => return None,
    };
    // small matrix components carry column padding
    if kind.starts_with("MAT") && size < 4 {
        return None;
    }

    let element = components * size;
    let stride = uint(view, "byteStride").unwrap_or(element);
    let count = uint(accessor, "count")?;
    let offset = uint(accessor, "byteOffset").unwrap_or(0);
    let view_offset = uint(view, "byteOffset").unwrap_or(0);
    let view_length = uint(view, "byteLength")?;

    if count > 0 {
        let end = stride
            .checked_mul(count - 1)?
            .checked_add(element)?
            .checked_add(offset)?;
        if end > view_length {
            return None;
        }
    }
    if view_offset.checked_add(view_length)? > data_len {
        return None;
    }

    Some(Layout {
        start: view_offset + offset,
        stride,
        element,
        count,
    })
}

fn accessor_elements<'a>(
    root: &Map<String, Value>,
    data: &'a [u8],
    accessor: &Value,
) -> Option<Vec<&'a [u8]>> {
    let layout = accessor_layout(root, accessor, data.len())?;
    (0..layout.count)
        .map(|i| {
            let start = layout.start + i * layout.stride;
            data.get(start..start + layout.element)
        })
        .collect()
}

fn view_of<'a>(root: &'a Map<String, Value>, accessor: &Value) -> Option<&'a Value> {
    entries(root, "bufferViews").nth(uint(accessor, "bufferView")?)
}

fn accessor_mut(root: &mut Map<String, Value>, index: usize) -> Option<&mut Map<String, Value>> {
    root.get_mut("accessors")?
        .as_array_mut()?
        .get_mut(index)?
        .as_object_mut()
}

/// Buffer `index` is the GLB binary chunk (no `uri`)
fn is_glb_buffer(root: &Map<String, Value>, index: usize) -> bool {
    entries(root, "buffers")
        .nth(index)
        .is_some_and(|buffer| buffer.get("uri").is_none())
}

fn set_buffer_length(root: &mut Map<String, Value>, length: usize) {
    let buffer = root
        .get_mut("buffers")
        .and_then(|buffers| buffers.get_mut(0))
        .and_then(Value::as_object_mut);
    if let Some(buffer) = buffer {
        buffer.insert("byteLength".to_string(), Value::from(length));
    }
}

fn pad(data: &mut Vec<u8>) {
    data.resize(data.len().next_multiple_of(4), 0);
}

fn uint(value: &Value, key: &str) -> Option<usize> {
    value.get(key)?.as_u64().map(|v| v as usize)
}

fn indices(value: Option<&Value>) -> impl Iterator<Item = usize> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_u64)
        .map(|i| i as usize)
}

/// Indices of `collection` referenced from the rest of the document
fn referenced(root: &mut Map<String, Value>, collection: Collection) -> BTreeSet<usize> {
    let mut used = BTreeSet::new();
    visit_refs(root, collection, &mut |index: &mut Value| {
        if let Some(i) = index.as_u64() {
            used.insert(i as usize);
        }
    });
    used
}

/// Rewrite references through `mapping` (old index -> new index)
fn remap(root: &mut Map<String, Value>, collection: Collection, mapping: &[Option<usize>]) {
    visit_refs(root, collection, &mut |index: &mut Value| remap_index(index, mapping));
}

fn remap_index(index: &mut Value, mapping: &[Option<usize>]) {
    let target = index
        .as_u64()
        .and_then(|i| mapping.get(i as usize).copied().flatten());
    if let Some(new) = target {
        *index = Value::from(new);
    }
}

/// Keep only the entries of `root[key]` listed in `keep`; drops the array
/// when it ends up empty. Returns the old -> new index mapping.
fn retain(
    root: &mut Map<String, Value>,
    key: &str,
    keep: &BTreeSet<usize>,
) -> Option<Vec<Option<usize>>> {
    let items = root.get_mut(key)?.as_array_mut()?;

    let mut next = 0;
    let mapping: Vec<Option<usize>> = (0..items.len())
        .map(|i| {
            keep.contains(&i).then(|| {
                next += 1;
                next - 1
            })
        })
        .collect();

    let old = std::mem::take(items);
    items.extend(
        old.into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, item)| item),
    );

    let empty = items.is_empty();
    if empty {
        root.remove(key);
    }
    Some(mapping)
}

/// Call `f` on every index value that points into `collection`
fn visit_refs(
    root: &mut Map<String, Value>,
    collection: Collection,
    f: &mut dyn FnMut(&mut Value),
) {
    match collection {
        Collection::Nodes => {
            for scene in entries_mut(root, "scenes") {
                visit_list(scene, "nodes", f);
            }
            for node in entries_mut(root, "nodes") {
                visit_list(node, "children", f);
            }
            for skin in entries_mut(root, "skins") {
                visit_list(skin, "joints", f);
                visit_one(skin, "skeleton", f);
            }
            for animation in entries_mut(root, "animations") {
                for channel in entries_of_mut(animation, "channels") {
                    if let Some(target) = channel.get_mut("target") {
                        visit_one(target, "node", f);
                    }
                }
            }
        }
        Collection::Meshes => {
            for node in entries_mut(root, "nodes") {
                visit_one(node, "mesh", f);
            }
        }
        Collection::Skins => {
            for node in entries_mut(root, "nodes") {
                visit_one(node, "skin", f);
            }
        }
        Collection::Materials => {
            for primitive in primitives_mut(root) {
                visit_one(primitive, "material", f);
                let variants = primitive.pointer_mut("/extensions/KHR_materials_variants");
                for mapping in variants.into_iter().flat_map(|v| entries_of_mut(v, "mappings")) {
                    visit_one(mapping, "material", f);
                }
            }
        }
        Collection::Textures => {
            for material in entries_mut(root, "materials") {
                visit_texture_infos(material, f);
            }
        }
        Collection::Images => {
            for texture in entries_mut(root, "textures") {
                visit_one(texture, "source", f);
                // EXT_texture_webp, KHR_texture_basisu and friends
                let extensions = texture.get_mut("extensions").and_then(Value::as_object_mut);
                for extension in extensions.into_iter().flat_map(|e| e.values_mut()) {
                    visit_one(extension, "source", f);
                }
            }
        }
        Collection::Samplers => {
            for texture in entries_mut(root, "textures") {
                visit_one(texture, "sampler", f);
            }
        }
        Collection::Accessors => {
            for primitive in primitives_mut(root) {
                visit_values(primitive, "attributes", f);
                visit_one(primitive, "indices", f);
                for target in entries_of_mut(primitive, "targets") {
                    for index in target.as_object_mut().into_iter().flat_map(|t| t.values_mut()) {
                        f(index);
                    }
                }
            }
            for skin in entries_mut(root, "skins") {
                visit_one(skin, "inverseBindMatrices", f);
            }
            for animation in entries_mut(root, "animations") {
                for sampler in entries_of_mut(animation, "samplers") {
                    visit_one(sampler, "input", f);
                    visit_one(sampler, "output", f);
                }
            }
            for node in entries_mut(root, "nodes") {
                if let Some(instancing) = node.pointer_mut("/extensions/EXT_mesh_gpu_instancing") {
                    visit_values(instancing, "attributes", f);
                }
            }
        }
        Collection::BufferViews => {
            // accessors, sparse storage, images and compression extensions
            for (key, value) in root.iter_mut() {
                if key != "bufferViews" {
                    visit_named(value, "bufferView", f);
                }
            }
        }
        Collection::Buffers => {
            for view in entries_mut(root, "bufferViews") {
                visit_one(view, "buffer", f);
            }
        }
    }
}

/// Texture references inside a material: any `*Texture` object's `index`
fn visit_texture_infos(value: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key.ends_with("Texture") {
                    visit_one(child, "index", f);
                }
                visit_texture_infos(child, f);
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_texture_infos(item, f);
            }
        }
        _ => {}
    }
}

fn visit_named(value: &mut Value, name: &str, f: &mut dyn FnMut(&mut Value)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == name {
                    f(child);
                } else {
                    visit_named(child, name, f);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_named(item, name, f);
            }
        }
        _ => {}
    }
}

fn visit_one(item: &mut Value, key: &str, f: &mut dyn FnMut(&mut Value)) {
    if let Some(index) = item.get_mut(key) {
        f(index);
    }
}

fn visit_list(item: &mut Value, key: &str, f: &mut dyn FnMut(&mut Value)) {
    for index in entries_of_mut(item, key) {
        f(index);
    }
}

fn visit_values(item: &mut Value, key: &str, f: &mut dyn FnMut(&mut Value)) {
    let values = item.get_mut(key).and_then(Value::as_object_mut);
    for index in values.into_iter().flat_map(|v| v.values_mut()) {
        f(index);
    }
}

fn primitives_mut(root: &mut Map<String, Value>) -> impl Iterator<Item = &mut Value> + '_ {
    entries_mut(root, "meshes").flat_map(|mesh| entries_of_mut(mesh, "primitives"))
}

fn entries<'a>(root: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Value> + 'a {
    root.get(key).and_then(Value::as_array).into_iter().flatten()
}

fn entries_mut<'a>(
    root: &'a mut Map<String, Value>,
    key: &str,
) -> impl Iterator<Item = &'a mut Value> + 'a {
    root.get_mut(key)
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

fn entries_of<'a>(item: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> + 'a {
    item.get(key).and_then(Value::as_array).into_iter().flatten()
}

fn entries_of_mut<'a>(item: &'a mut Value, key: &str) -> impl Iterator<Item = &'a mut Value> + 'a {
    item.get_mut(key)
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

#[cfg(test)]
pub(crate) mod fixture {
    use serde_json::{json, Map, Value};

    /// Builds a GLB document where every accessor gets its own view
    pub(crate) struct Fixture {
        json: Value,
        bin: Vec<u8>,
    }

    impl Fixture {
        pub(crate) fn new(json: Value) -> Self {
            Self {
                json,
                bin: Vec::new(),
            }
        }

        pub(crate) fn accessor(
            &mut self,
            bytes: &[u8],
            component_type: u64,
            kind: &str,
            count: usize,
            target: u64,
        ) -> usize {
            while self.bin.len() % 4 != 0 {
                self.bin.push(0);
            }
            let offset = self.bin.len();
            self.bin.extend_from_slice(bytes);

            let view = self.push(
                "bufferViews",
                json!({ "buffer": 0, "byteOffset": offset, "byteLength": bytes.len(), "target": target }),
            );
            self.push(
                "accessors",
                json!({ "bufferView": view, "componentType": component_type, "type": kind, "count": count }),
            )
        }

        pub(crate) fn insert(&mut self, key: &str, value: Value) {
            self.json[key] = value;
        }

        pub(crate) fn finish(mut self) -> (Map<String, Value>, Option<Vec<u8>>) {
            self.json["buffers"] = json!([{ "byteLength": self.bin.len() }]);
            let Value::Object(root) = self.json else {
                panic!("fixture root is not an object");
            };
            (root, Some(self.bin))
        }

        fn push(&mut self, key: &str, item: Value) -> usize {
            let items = self.json[key].as_array_mut();
            match items {
                Some(items) => {
                    items.push(item);
                    items.len() - 1
                }
                None => {
                    self.json[key] = json!([item]);
                    0
                }
            }
        }
    }

    pub(crate) fn floats(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub(crate) fn u32s(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{floats, u32s, Fixture};
    use super::*;

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn count(root: &Map<String, Value>, key: &str) -> usize {
        entries(root, key).count()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn sample() -> Map<String, Value> {
        object(json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 1 }],
            "meshes": [
                { "name": "orphan", "primitives": [{ "attributes": {}, "material": 0 }] },
                { "name": "body", "primitives": [
                    { "attributes": {}, "material": 2 },
                    { "attributes": {}, "material": 3 }
                ] }
            ],
            "materials": [
                { "name": "orphaned", "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } },
                { "name": "unused" },
                { "name": "skin", "pbrMetallicRoughness": { "baseColorTexture": { "index": 1 } } },
                { "name": "skin copy", "pbrMetallicRoughness": { "baseColorTexture": { "index": 2 } } }
            ],
            "textures": [
                { "source": 0, "sampler": 0 },
                { "source": 1, "sampler": 0 },
                { "source": 1, "sampler": 1 }
            ],
            "images": [
                { "uri": "orphan.png" },
                { "uri": "skin.png" }
            ],
            "samplers": [
                { "magFilter": 9729 },
                { "magFilter": 9729 }
            ]
        }))
    }

    fn view_bytes<'a>(root: &Map<String, Value>, bin: &'a [u8], accessor: usize) -> &'a [u8] {
        let view = root["accessors"][accessor]["bufferView"].as_u64().unwrap() as usize;
        let view = &root["bufferViews"][view];
        let offset = view["byteOffset"].as_u64().unwrap() as usize;
        let length = view["byteLength"].as_u64().unwrap() as usize;
        &bin[offset..offset + length]
    }

    #[test]
    fn test_prune_remaps_references() {
        let mut root = sample();
        let removed = prune(&mut root, &mut None);

        // orphan mesh, 2 materials, 1 texture, 1 image
        assert_eq!(removed, 5);
        assert_eq!(count(&root, "meshes"), 1);
        assert_eq!(root["nodes"][0]["mesh"], json!(0));
        assert_eq!(count(&root, "materials"), 2);
        assert_eq!(root["meshes"][0]["primitives"][0]["material"], json!(0));
        assert_eq!(root["meshes"][0]["primitives"][1]["material"], json!(1));
        assert_eq!(count(&root, "textures"), 2);
        assert_eq!(
            root["materials"][1]["pbrMetallicRoughness"]["baseColorTexture"]["index"],
            json!(1)
        );
        assert_eq!(count(&root, "images"), 1);
        assert_eq!(root["textures"][0]["source"], json!(0));
        assert_eq!(count(&root, "samplers"), 2);
    }

    #[test]
    fn test_dedup_merges_identical_entries() {
        let mut root = sample();
        let mut bin = None;
        prune(&mut root, &mut bin);
        let merged = dedup(&mut root, &mut bin);

        // sampler 1 == sampler 0, then texture 1 == texture 0, then the
        // two skin materials only differ by name
        assert_eq!(merged, 3);
        assert_eq!(count(&root, "samplers"), 1);
        assert_eq!(count(&root, "textures"), 1);
        assert_eq!(count(&root, "materials"), 1);
        assert_eq!(root["meshes"][0]["primitives"][1]["material"], json!(0));
    }

    #[test]
    fn test_empty_collections_are_dropped() {
        let mut root = object(json!({
            "asset": { "version": "2.0" },
            "materials": [{ "name": "unused" }]
        }));
        prune(&mut root, &mut None);
        assert!(root.get("materials").is_none());
    }

    #[test]
    fn test_prune_drops_detached_nodes_and_their_data() {
        let mut fixture = Fixture::new(json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "name": "body", "mesh": 0 },
                { "name": "detached", "mesh": 1 }
            ]
        }));
        let body = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        let body_indices =
            fixture.accessor(&u32s(&[0, 1, 2]), UNSIGNED_INT, "SCALAR", 3, ELEMENT_ARRAY_BUFFER);
        let detached = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        let orphan = fixture.accessor(&floats(&[0.5; 192]), FLOAT, "VEC3", 64, ARRAY_BUFFER);
        fixture.insert(
            "meshes",
            json!([
                { "primitives": [{ "attributes": { "POSITION": body }, "indices": body_indices }] },
                { "primitives": [{ "attributes": { "POSITION": detached } }] },
                { "name": "orphan", "primitives": [{ "attributes": { "POSITION": orphan } }] }
            ]),
        );
        let (mut root, mut bin) = fixture.finish();
        assert_eq!(bin.as_ref().map(Vec::len), Some(852));

        let removed = prune(&mut root, &mut bin);

        // detached node, two meshes, their accessors and views
        assert_eq!(removed, 7);
        assert_eq!(count(&root, "nodes"), 1);
        assert_eq!(count(&root, "meshes"), 1);
        assert_eq!(count(&root, "accessors"), 2);
        assert_eq!(count(&root, "bufferViews"), 2);

        let bin = bin.unwrap();
        assert_eq!(bin.len(), 48);
        assert_eq!(root["buffers"][0]["byteLength"], json!(48));
        assert_eq!(root["meshes"][0]["primitives"][0]["indices"], json!(1));
        assert_eq!(view_bytes(&root, &bin, 0), &floats(&TRIANGLE)[..]);
        assert_eq!(view_bytes(&root, &bin, 1), &u32s(&[0, 1, 2])[..]);
    }

    #[test]
    fn test_prune_keeps_joints_and_drops_dead_animation() {
        let mut root = object(json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "children": [1], "skin": 0 },
                { "name": "arm" },
                { "name": "detached" },
                { "name": "joint" }
            ],
            "skins": [{ "joints": [3] }],
            "accessors": [
                { "componentType": 5126, "type": "SCALAR", "count": 2 },
                { "componentType": 5126, "type": "VEC3", "count": 2 },
                { "componentType": 5126, "type": "VEC3", "count": 2 }
            ],
            "animations": [
                {
                    "channels": [
                        { "sampler": 0, "target": { "node": 1, "path": "translation" } },
                        { "sampler": 1, "target": { "node": 2, "path": "translation" } }
                    ],
                    "samplers": [{ "input": 0, "output": 1 }, { "input": 0, "output": 2 }]
                },
                {
                    "channels": [{ "sampler": 0, "target": { "node": 2, "path": "scale" } }],
                    "samplers": [{ "input": 0, "output": 2 }]
                }
            ]
        }));

        let removed = prune(&mut root, &mut None);

        // the detached node and the output only its channels used
        assert_eq!(removed, 2);
        assert_eq!(count(&root, "nodes"), 3);
        assert_eq!(root["skins"][0]["joints"], json!([2]));
        assert_eq!(count(&root, "animations"), 1);
        assert_eq!(root["animations"][0]["channels"].as_array().unwrap().len(), 1);
        assert_eq!(root["animations"][0]["samplers"].as_array().unwrap().len(), 1);
        assert_eq!(count(&root, "accessors"), 2);
    }

    #[test]
    fn test_unused_binary_chunk_is_dropped() {
        let mut fixture = Fixture::new(json!({ "asset": { "version": "2.0" } }));
        let orphan = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        fixture.insert(
            "meshes",
            json!([{ "primitives": [{ "attributes": { "POSITION": orphan } }] }]),
        );
        let (mut root, mut bin) = fixture.finish();

        prune(&mut root, &mut bin);
        assert!(bin.is_none());
        assert!(root.get("buffers").is_none());
        assert!(root.get("bufferViews").is_none());
    }

    #[test]
    fn test_dedup_shares_identical_accessors() {
        let mut fixture = Fixture::new(json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0, 1] }],
            "nodes": [{ "mesh": 0 }, { "mesh": 1 }]
        }));
        let left = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        let right = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        fixture.insert(
            "meshes",
            json!([
                { "name": "left", "primitives": [{ "attributes": { "POSITION": left } }] },
                { "name": "right", "primitives": [{ "attributes": { "POSITION": right } }] }
            ]),
        );
        let (mut root, mut bin) = fixture.finish();

        let merged = dedup(&mut root, &mut bin);

        // the second accessor, then the mesh that only differed by it
        assert_eq!(merged, 2);
        assert_eq!(count(&root, "accessors"), 1);
        assert_eq!(count(&root, "bufferViews"), 1);
        assert_eq!(count(&root, "meshes"), 1);
        assert_eq!(root["nodes"][1]["mesh"], json!(0));
        assert_eq!(bin.map(|b| b.len()), Some(36));
    }

    #[test]
    fn test_compress_narrows_small_indices() {
        let mut fixture = Fixture::new(json!({ "asset": { "version": "2.0" } }));
        let position = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        let small = fixture.accessor(
            &u32s(&[0, 1, 2, 2, 1, 0]),
            UNSIGNED_INT,
            "SCALAR",
            6,
            ELEMENT_ARRAY_BUFFER,
        );
        let large =
            fixture.accessor(&u32s(&[0, 1, 70000]), UNSIGNED_INT, "SCALAR", 3, ELEMENT_ARRAY_BUFFER);
        fixture.insert(
            "meshes",
            json!([{ "primitives": [
                { "attributes": { "POSITION": position }, "indices": small },
                { "attributes": { "POSITION": position }, "indices": large }
            ] }]),
        );
        let (mut root, mut bin) = fixture.finish();

        assert_eq!(compress(&mut root, &mut bin), 1);

        let bin = bin.unwrap();
        assert_eq!(root["accessors"][small]["componentType"], json!(UNSIGNED_SHORT));
        assert_eq!(root["accessors"][large]["componentType"], json!(UNSIGNED_INT));

        let narrowed: Vec<u16> = view_bytes(&root, &bin, small)
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(narrowed, [0, 1, 2, 2, 1, 0]);

        // the 32-bit copy is gone and the chunk repacked
        assert_eq!(count(&root, "bufferViews"), 3);
        assert_eq!(bin.len(), 60);
    }

    #[test]
    fn test_quantize_normals_and_texcoords() {
        let mut fixture = Fixture::new(json!({ "asset": { "version": "2.0" } }));
        let position = fixture.accessor(&floats(&TRIANGLE), FLOAT, "VEC3", 3, ARRAY_BUFFER);
        let normal = fixture.accessor(
            &floats(&[0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]),
            FLOAT,
            "VEC3",
            3,
            ARRAY_BUFFER,
        );
        let uv = fixture.accessor(
            &floats(&[0.0, 0.0, 1.0, 0.5, 0.25, 1.0]),
            FLOAT,
            "VEC2",
            3,
            ARRAY_BUFFER,
        );
        let tiled = fixture.accessor(
            &floats(&[0.0, 0.0, 2.0, 0.0, 0.0, 1.0]),
            FLOAT,
            "VEC2",
            3,
            ARRAY_BUFFER,
        );
        fixture.insert(
            "meshes",
            json!([{ "primitives": [{ "attributes": {
                "POSITION": position,
                "NORMAL": normal,
                "TEXCOORD_0": uv,
                "TEXCOORD_1": tiled
            } }] }]),
        );
        let (mut root, mut bin) = fixture.finish();

        assert_eq!(quantize(&mut root, &mut bin), 2);
        let bin = bin.unwrap();

        assert_eq!(root["accessors"][position]["componentType"], json!(FLOAT));
        assert_eq!(root["accessors"][tiled]["componentType"], json!(FLOAT));

        assert_eq!(root["accessors"][normal]["componentType"], json!(SHORT));
        assert_eq!(root["accessors"][normal]["normalized"], json!(true));
        let normals: Vec<i16> = view_bytes(&root, &bin, normal)
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(normals[..4], [0, 0, 32767, 0]);

        assert_eq!(root["accessors"][uv]["componentType"], json!(UNSIGNED_SHORT));
        let uvs: Vec<u16> = view_bytes(&root, &bin, uv)
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(uvs, [0, 0, 65535, 32768, 16384, 65535]);

        assert_eq!(root["extensionsUsed"], json!([KHR_MESH_QUANTIZATION]));
        assert_eq!(root["extensionsRequired"], json!([KHR_MESH_QUANTIZATION]));
        assert_eq!(count(&root, "bufferViews"), 4);

        // already quantized
        let mut bin = Some(bin);
        assert_eq!(quantize(&mut root, &mut bin), 0);
        assert_eq!(root["extensionsUsed"], json!([KHR_MESH_QUANTIZATION]));
    }
}
