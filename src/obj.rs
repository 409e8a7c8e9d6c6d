// obj.rs — Typed value objects.
//
// A value is a tagged union over the five exposed types, each variant itself
// a sum of its storage encodings. Dispatch is structural matching; there is
// no virtual layer. Creation biases toward the most compact encoding and the
// conversion functions here only ever promote: a value that has grown into
// the general encoding never converts back down, even if it shrinks.
//
// The keyspace owns every value. Readers get borrowed views or decoded
// copies; nothing here is reference counted. Hot numeric replies draw on a
// preformatted pool of small integer strings instead of allocating.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::OnceLock;

use crate::dict::Dict;
use crate::intset::IntSet;
use crate::sds::Sds;
use crate::skiplist::SkipList;
use crate::util;
use crate::ziplist::Ziplist;

/// Longest string stored inline in the embedded encoding.
pub const EMBSTR_MAX: usize = 39;

/// Preformatted decimal strings for 0..SHARED_INTEGERS.
pub const SHARED_INTEGERS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Str,
    List,
    Set,
    Zset,
    Hash,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Str => "string",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::Zset => "zset",
            ValueType::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int,
    EmbStr,
    Raw,
    ZipList,
    LinkedList,
    IntSet,
    HashTable,
    SkipList,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::EmbStr => "embstr",
            Encoding::Raw => "raw",
            Encoding::ZipList => "ziplist",
            Encoding::LinkedList => "linkedlist",
            Encoding::IntSet => "intset",
            Encoding::HashTable => "hashtable",
            Encoding::SkipList => "skiplist",
        }
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

pub enum StrVal {
    /// Canonical decimal strings live as the machine integer.
    Int(i64),
    /// Short strings are held inline, no heap allocation.
    Embed { len: u8, buf: [u8; EMBSTR_MAX] },
    /// Everything else, and anything that has been mutated in place.
    Raw(Sds),
}

impl StrVal {
    pub fn from_bytes(data: &[u8]) -> StrVal {
        if let Some(v) = util::parse_i64(data) {
            return StrVal::Int(v);
        }
        if data.len() <= EMBSTR_MAX {
            let mut buf = [0u8; EMBSTR_MAX];
            buf[..data.len()].copy_from_slice(data);
            StrVal::Embed { len: data.len() as u8, buf }
        } else {
            StrVal::Raw(Sds::from_bytes(data))
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            StrVal::Int(_) => Encoding::Int,
            StrVal::Embed { .. } => Encoding::EmbStr,
            StrVal::Raw(_) => Encoding::Raw,
        }
    }

    /// Content bytes; integers are formatted on the fly.
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            StrVal::Int(v) => Cow::Owned(util::format_i64(*v)),
            StrVal::Embed { len, buf } => Cow::Borrowed(&buf[..*len as usize]),
            StrVal::Raw(s) => Cow::Borrowed(s.as_bytes()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StrVal::Int(v) => util::format_i64(*v).len(),
            StrVal::Embed { len, .. } => *len as usize,
            StrVal::Raw(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StrVal::Int(_) => false,
            StrVal::Embed { len, .. } => *len == 0,
            StrVal::Raw(s) => s.is_empty(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StrVal::Int(v) => Some(*v),
            StrVal::Embed { len, buf } => util::parse_i64(&buf[..*len as usize]),
            StrVal::Raw(s) => s.parse_i64(),
        }
    }

    /// Forces the raw encoding ahead of an in-place mutation. Promotion
    /// only; the value never returns to int or embedded form afterwards.
    pub fn make_raw(&mut self) -> &mut Sds {
        if !matches!(self, StrVal::Raw(_)) {
            let bytes = self.bytes().into_owned();
            *self = StrVal::Raw(Sds::from(bytes));
        }
        match self {
            StrVal::Raw(s) => s,
            _ => unreachable!(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

pub enum ListVal {
    Zip(Ziplist),
    Linked(VecDeque<Sds>),
}

impl ListVal {
    pub fn encoding(&self) -> Encoding {
        match self {
            ListVal::Zip(_) => Encoding::ZipList,
            ListVal::Linked(_) => Encoding::LinkedList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ListVal::Zip(zl) => zl.len(),
            ListVal::Linked(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes the packed form to the general linked form.
    pub fn convert(&mut self) {
        if let ListVal::Zip(zl) = self {
            let items: VecDeque<Sds> =
                zl.iter().map(|v| Sds::from(v.to_bytes())).collect();
            *self = ListVal::Linked(items);
        }
    }
}

pub enum SetVal {
    Ints(IntSet),
    Table(Dict<Sds, ()>),
}

impl SetVal {
    pub fn encoding(&self) -> Encoding {
        match self {
            SetVal::Ints(_) => Encoding::IntSet,
            SetVal::Table(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SetVal::Ints(s) => s.len(),
            SetVal::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes the integer array to a hash table, presizing it for the
    /// current population.
    pub fn convert(&mut self) {
        if let SetVal::Ints(ints) = self {
            let mut d: Dict<Sds, ()> = Dict::new();
            d.expand(ints.len());
            for v in ints.iter() {
                d.add(Sds::from_i64(v), ());
            }
            *self = SetVal::Table(d);
        }
    }
}

/// General sorted-set form: the member table answers score lookups, the
/// skip list answers order and rank queries. Both index the same logical
/// membership.
pub struct ZsetFull {
    pub dict: Dict<Sds, f64>,
    pub zsl: SkipList,
}

pub enum ZsetVal {
    /// Alternating member, score entries kept in score order.
    Zip(Ziplist),
    Skip(ZsetFull),
}

impl ZsetVal {
    pub fn encoding(&self) -> Encoding {
        match self {
            ZsetVal::Zip(_) => Encoding::ZipList,
            ZsetVal::Skip(_) => Encoding::SkipList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ZsetVal::Zip(zl) => zl.len() / 2,
            ZsetVal::Skip(z) => z.zsl.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn convert(&mut self) {
        if let ZsetVal::Zip(zl) = self {
            let mut full = ZsetFull { dict: Dict::new(), zsl: SkipList::new() };
            let mut it = zl.iter();
            while let Some(member) = it.next() {
                let score_entry = it.next().expect("member without score");
                let member = Sds::from(member.to_bytes());
                let score = score_entry
                    .as_i64()
                    .map(|v| v as f64)
                    .or_else(|| util::parse_f64(&score_entry.to_bytes()))
                    .expect("unparseable packed score");
                full.dict.insert(member.clone(), score);
                full.zsl.insert(score, member);
            }
            *self = ZsetVal::Skip(full);
        }
    }
}

pub enum HashVal {
    /// Alternating field, value entries in insertion order.
    Zip(Ziplist),
    Table(Dict<Sds, Sds>),
}

impl HashVal {
    pub fn encoding(&self) -> Encoding {
        match self {
            HashVal::Zip(_) => Encoding::ZipList,
            HashVal::Table(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HashVal::Zip(zl) => zl.len() / 2,
            HashVal::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn convert(&mut self) {
        if let HashVal::Zip(zl) = self {
            let mut d: Dict<Sds, Sds> = Dict::new();
            d.expand(zl.len() / 2);
            let mut it = zl.iter();
            while let Some(field) = it.next() {
                let value = it.next().expect("field without value");
                d.insert(Sds::from(field.to_bytes()), Sds::from(value.to_bytes()));
            }
            *self = HashVal::Table(d);
        }
    }
}

// ---------------------------------------------------------------------------
// The tagged union
// ---------------------------------------------------------------------------

pub enum Value {
    Str(StrVal),
    List(ListVal),
    Set(SetVal),
    Zset(ZsetVal),
    Hash(HashVal),
}

impl Value {
    /// String value under the most compact admissible encoding.
    pub fn from_bytes(data: &[u8]) -> Value {
        Value::Str(StrVal::from_bytes(data))
    }

    pub fn from_i64(v: i64) -> Value {
        Value::Str(StrVal::Int(v))
    }

    /// Empty list in the packed encoding.
    pub fn empty_list() -> Value {
        Value::List(ListVal::Zip(Ziplist::new()))
    }

    /// Empty set in the integer-array encoding.
    pub fn empty_intset() -> Value {
        Value::Set(SetVal::Ints(IntSet::new()))
    }

    pub fn empty_set_table() -> Value {
        Value::Set(SetVal::Table(Dict::new()))
    }

    pub fn empty_zset_zip() -> Value {
        Value::Zset(ZsetVal::Zip(Ziplist::new()))
    }

    pub fn empty_zset_full() -> Value {
        Value::Zset(ZsetVal::Skip(ZsetFull { dict: Dict::new(), zsl: SkipList::new() }))
    }

    pub fn empty_hash() -> Value {
        Value::Hash(HashVal::Zip(Ziplist::new()))
    }

    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::List(_) => ValueType::List,
            Value::Set(_) => ValueType::Set,
            Value::Zset(_) => ValueType::Zset,
            Value::Hash(_) => ValueType::Hash,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Str(s) => s.encoding(),
            Value::List(l) => l.encoding(),
            Value::Set(s) => s.encoding(),
            Value::Zset(z) => z.encoding(),
            Value::Hash(h) => h.encoding(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared integer strings
// ---------------------------------------------------------------------------

fn shared_pool() -> &'static Vec<Vec<u8>> {
    static POOL: OnceLock<Vec<Vec<u8>>> = OnceLock::new();
    POOL.get_or_init(|| (0..SHARED_INTEGERS).map(util::format_i64).collect())
}

/// Decimal form of `v`, borrowed from the shared pool when `v` is one of
/// the small non-negative integers every workload formats constantly.
pub fn int_reply(v: i64) -> Cow<'static, [u8]> {
    if (0..SHARED_INTEGERS).contains(&v) {
        Cow::Borrowed(shared_pool()[v as usize].as_slice())
    } else {
        Cow::Owned(util::format_i64(v))
    }
}
