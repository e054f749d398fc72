//! Type-tag dispatching (de)serializer, used whenever a node crosses the
//! boundary to or from a backing store.
//!
//! Wire layout (§6 of the spec):
//!   - leaf:     `type_tag: u8, count: u16, keys: K × count, values: V × count`
//!   - internal: `type_tag: u8, pivot_count: u16, pivots: K × pivot_count,
//!                children: Oid × (pivot_count + 1)`
//!   - an on-disk `Oid` is `medium: u8, type_tag: u8, offset: u64, size: u32`

use crate::fixed::{FixedWidth, Key, Value};
use crate::node::{InternalNode, LeafNode, Node};
use crate::oid::{Medium, Oid, TypeTag};
use crate::{Error, Result};

const OID_WIDTH: usize = 1 + 1 + 8 + 4;

fn encode_oid(oid: Oid, out: &mut Vec<u8>) -> Result<()> {
    if oid.is_volatile() {
        return Err(Error::Fatal(format!(
            "attempted to persist a volatile child OID {oid}; it must be rewritten before flush"
        )));
    }
    let medium_byte = match oid.medium() {
        Medium::File => 0u8,
        Medium::PMem => 1u8,
        Medium::Volatile => unreachable!(),
    };
    let tag_byte = oid.type_tag().as_u8();
    let (offset, size) = oid.location();
    out.push(medium_byte);
    out.push(tag_byte);
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    Ok(())
}

fn decode_oid(buf: &[u8]) -> Result<Oid> {
    if buf.len() < OID_WIDTH {
        return Err(Error::Fatal("truncated OID in node payload".into()));
    }
    let medium = match buf[0] {
        0 => Medium::File,
        1 => Medium::PMem,
        other => return Err(Error::Fatal(format!("unknown medium byte {other}"))),
    };
    let type_tag = TypeTag::from_u8(buf[1])?;
    let offset = u64::from_le_bytes(buf[2..10].try_into().unwrap());
    let size = u32::from_le_bytes(buf[10..14].try_into().unwrap());
    Ok(Oid::from_located(medium, type_tag, offset, size))
}

/// Serializes `node` into a freshly allocated byte buffer.
pub fn serialize<K: Key, V: Value>(node: &Node<K, V>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(node.serialized_size());
    out.push(node.type_tag().as_u8());
    match node {
        Node::Leaf(leaf) => serialize_leaf(leaf, &mut out),
        Node::Internal(internal) => serialize_internal(internal, &mut out)?,
    }
    Ok(out)
}

fn serialize_leaf<K: Key, V: Value>(leaf: &LeafNode<K, V>, out: &mut Vec<u8>) {
    let count = leaf.len() as u16;
    out.extend_from_slice(&count.to_le_bytes());
    for k in leaf.keys() {
        let mut buf = vec![0u8; K::WIDTH];
        k.write_bytes(&mut buf);
        out.extend_from_slice(&buf);
    }
    for v in leaf.values() {
        let mut buf = vec![0u8; V::WIDTH];
        v.write_bytes(&mut buf);
        out.extend_from_slice(&buf);
    }
}

fn serialize_internal<K: Key>(internal: &InternalNode<K>, out: &mut Vec<u8>) -> Result<()> {
    let count = internal.len() as u16;
    out.extend_from_slice(&count.to_le_bytes());
    for p in internal.pivots() {
        let mut buf = vec![0u8; K::WIDTH];
        p.write_bytes(&mut buf);
        out.extend_from_slice(&buf);
    }
    for c in internal.children() {
        encode_oid(*c, out)?;
    }
    Ok(())
}

/// Deserializes a node from `data`, which must begin with the type tag byte
/// (i.e. `data` is exactly what `serialize` produced).
pub fn deserialize<K: Key, V: Value>(data: &[u8]) -> Result<Node<K, V>> {
    if data.is_empty() {
        return Err(Error::Fatal("empty node payload".into()));
    }
    let tag = TypeTag::from_u8(data[0])?;
    let rest = &data[1..];
    match tag {
        TypeTag::Leaf => deserialize_leaf(rest).map(Node::Leaf),
        TypeTag::Internal => deserialize_internal(rest).map(Node::Internal),
    }
}

fn deserialize_leaf<K: Key, V: Value>(data: &[u8]) -> Result<LeafNode<K, V>> {
    if data.len() < 2 {
        return Err(Error::Fatal("truncated leaf header".into()));
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let mut off = 2;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let end = off + K::WIDTH;
        keys.push(K::read_bytes(slice(data, off, end)?));
        off = end;
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let end = off + V::WIDTH;
        values.push(V::read_bytes(slice(data, off, end)?));
        off = end;
    }
    Ok(LeafNode::from_parts(keys, values))
}

fn deserialize_internal<K: Key>(data: &[u8]) -> Result<InternalNode<K>> {
    if data.len() < 2 {
        return Err(Error::Fatal("truncated internal header".into()));
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let mut off = 2;
    let mut pivots = Vec::with_capacity(count);
    for _ in 0..count {
        let end = off + K::WIDTH;
        pivots.push(K::read_bytes(slice(data, off, end)?));
        off = end;
    }
    let mut children = Vec::with_capacity(count + 1);
    for _ in 0..(count + 1) {
        let end = off + OID_WIDTH;
        children.push(decode_oid(slice(data, off, end)?)?);
        off = end;
    }
    Ok(InternalNode::from_parts(pivots, children))
}

fn slice(data: &[u8], start: usize, end: usize) -> Result<&[u8]> {
    data.get(start..end)
        .ok_or_else(|| Error::Fatal("truncated node payload".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn leaf_serialize_deserialize_is_identity(mut keys: Vec<u32>) -> TestResult {
        keys.sort_unstable();
        keys.dedup();
        if keys.len() > u16::MAX as usize {
            return TestResult::discard();
        }
        let mut leaf = LeafNode::<u32, u32>::empty();
        for k in &keys {
            leaf.insert(*k, k.wrapping_mul(2));
        }
        let node = Node::Leaf(leaf);
        let bytes = serialize(&node).unwrap();
        let back: Node<u32, u32> = deserialize(&bytes).unwrap();
        TestResult::from_bool(back.as_leaf().unwrap().keys() == node.as_leaf().unwrap().keys() && back.as_leaf().unwrap().values() == node.as_leaf().unwrap().values())
    }

    #[quickcheck]
    fn internal_serialize_deserialize_is_identity(mut pivots: Vec<u32>) -> TestResult {
        pivots.sort_unstable();
        pivots.dedup();
        if pivots.is_empty() || pivots.len() > u16::MAX as usize {
            return TestResult::discard();
        }
        let children: Vec<Oid> = (0..=pivots.len())
            .map(|i| Oid::from_file(TypeTag::Leaf, (i * 64) as u64, 64))
            .collect();
        let internal = InternalNode::<u32>::from_parts(pivots.clone(), children.clone());
        let node = Node::<u32, u32>::Internal(internal);
        let bytes = serialize(&node).unwrap();
        let back: Node<u32, u32> = deserialize(&bytes).unwrap();
        TestResult::from_bool(back.as_internal().unwrap().pivots() == &pivots[..] && back.as_internal().unwrap().children() == &children[..])
    }

    #[test]
    fn leaf_round_trips() {
        let mut leaf = LeafNode::<u64, u64>::empty();
        for i in 0..5u64 {
            leaf.insert(i, i * 100);
        }
        let node = Node::Leaf(leaf);
        let bytes = serialize(&node).unwrap();
        let back: Node<u64, u64> = deserialize(&bytes).unwrap();
        match back {
            Node::Leaf(l) => {
                assert_eq!(l.keys(), node.as_leaf().unwrap().keys());
                assert_eq!(l.values(), node.as_leaf().unwrap().values());
            }
            Node::Internal(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn internal_round_trips() {
        let children = vec![
            Oid::from_file(TypeTag::Leaf, 0, 16),
            Oid::from_file(TypeTag::Leaf, 16, 16),
            Oid::from_pmem(TypeTag::Internal, 32, 24),
        ];
        let internal = InternalNode::<u32>::from_parts(vec![10, 20], children.clone());
        let node = Node::<u32, u32>::Internal(internal);
        let bytes = serialize(&node).unwrap();
        let back: Node<u32, u32> = deserialize(&bytes).unwrap();
        match back {
            Node::Internal(p) => {
                assert_eq!(p.pivots(), &[10, 20]);
                assert_eq!(p.children(), &children[..]);
            }
            Node::Leaf(_) => panic!("expected internal"),
        }
    }

    #[test]
    fn volatile_child_refuses_to_serialize() {
        let children = vec![
            Oid::from_volatile(TypeTag::Leaf, 0xdead),
            Oid::from_file(TypeTag::Leaf, 16, 16),
        ];
        let internal = InternalNode::<u32>::from_parts(vec![10], children);
        let node = Node::<u32, u32>::Internal(internal);
        assert!(serialize(&node).is_err());
    }
}
