use serde::Serialize;

/// Scalar values known to the compiler. Every non-nil variant knows how many
/// bytes it occupies in the target's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Byte(u8),
    Int(i16),
    State { current: u16, count: u16 },
}

/// The 2-bit type tag carried by LOAD and STORE words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Byte,
    Int,
    State,
}

impl ValueType {
    pub const ALL: [ValueType; 4] = [ValueType::Bool, ValueType::Byte, ValueType::Int, ValueType::State];

    pub fn tag(self) -> u32 {
        match self {
            ValueType::Bool => 0b00,
            ValueType::Byte => 0b01,
            ValueType::Int => 0b10,
            ValueType::State => 0b11,
        }
    }

    pub fn from_tag(tag: u32) -> Option<ValueType> {
        match tag {
            0b00 => Some(ValueType::Bool),
            0b01 => Some(ValueType::Byte),
            0b10 => Some(ValueType::Int),
            0b11 => Some(ValueType::State),
            _ => None,
        }
    }

    /// Storage size in bytes.
    pub fn size(self) -> u32 {
        match self {
            ValueType::Bool | ValueType::Byte => 1,
            ValueType::Int | ValueType::State => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Byte => "byte",
            ValueType::Int => "int",
            ValueType::State => "state",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Nil => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Byte(_) => Some(ValueType::Byte),
            Value::Int(_) => Some(ValueType::Int),
            Value::State { .. } => Some(ValueType::State),
        }
    }

    /// Storage size in bytes; nil occupies nothing.
    pub fn size(&self) -> u32 {
        self.value_type().map_or(0, ValueType::size)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Build a value of type `ty` from a source literal, checking the range of
    /// the type. `state_count` bounds state values and is ignored otherwise.
    pub fn from_literal(ty: ValueType, literal: i32, state_count: u16) -> Result<Value, RangeError> {
        let out_of_range = || RangeError { ty, literal };
        match ty {
            ValueType::Bool => match literal {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(out_of_range()),
            },
            ValueType::Byte => u8::try_from(literal).map(Value::Byte).map_err(|_| out_of_range()),
            ValueType::Int => i16::try_from(literal).map(Value::Int).map_err(|_| out_of_range()),
            ValueType::State => match u16::try_from(literal) {
                Ok(current) if current < state_count => Ok(Value::State { current, count: state_count }),
                _ => Err(out_of_range()),
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::State { current, count } => write!(f, "state {} of {}", current, count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{literal} is out of range for type {ty}")]
pub struct RangeError {
    pub ty: ValueType,
    pub literal: i32,
}
