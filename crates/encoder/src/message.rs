use serde::{Serialize, Deserialize};

use crate::GroupId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    Handle(u64),
    Pointer(u64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub os: String,
    pub cpu_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abi {
    pub architecture: String,
    pub pointer_size: u32,
    pub little_endian: bool,
}

impl Abi {
    pub fn current() -> Self {
        Self {
            architecture: std::env::consts::ARCH.to_string(),
            pointer_size: std::mem::size_of::<usize>() as u32,
            little_endian: cfg!(target_endian = "little"),
        }
    }
}

/// First record of every trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u32,
    pub device: DeviceInfo,
    pub abi: Abi,
    pub flags: u32,
    pub start_frame: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub api: u8,
    pub name: String,
    pub thread: u64,
    pub args: Vec<Value>,
}

/// Reference to stored resource bytes. Positive ids announce a resource sent
/// just before the observation, negative ids point at one sent earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef(pub i64);

impl ResourceRef {
    pub fn index(&self) -> u64 {
        self.0.unsigned_abs()
    }

    pub fn is_new(&self) -> bool {
        self.0 > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub pool: u32,
    pub base: u64,
    pub size: u64,
    pub resource: ResourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: u64,
    pub hash: [u8; 32],
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramebufferObservation {
    pub original_width: u32,
    pub original_height: u32,
    pub downsampled_width: u32,
    pub downsampled_height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub type_id: i64,
    pub backref: i64,
    pub fields: Vec<(String, Value)>,
}

/// State synthesised by mid-execution capture for one shadow object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub api: u8,
    pub kind: String,
    pub handle: u64,
    pub fields: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Header(CaptureHeader),
    Command(Command),
    Return(Value),
    Observation(Observation),
    Resource(Resource),
    FramebufferObservation(FramebufferObservation),
    TypeDefinition(TypeDefinition),
    Object(Object),
    InitialState(InitialState),
    Extra { name: String, value: Value },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Header(_) => "header",
            Message::Command(_) => "command",
            Message::Return(_) => "return",
            Message::Observation(_) => "observation",
            Message::Resource(_) => "resource",
            Message::FramebufferObservation(_) => "framebuffer",
            Message::TypeDefinition(_) => "type",
            Message::Object(_) => "object",
            Message::InitialState(_) => "initial-state",
            Message::Extra { .. } => "extra",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: GroupId,
    pub parent: Option<GroupId>,
    pub group: bool,
    pub message: Message,
}
