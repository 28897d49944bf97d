use serde::de::{self, DeserializeSeed, IntoDeserializer, Visitor};

use crate::{
    error::{Error, Result},
    varint,
};

/// Largest element count accepted without one input byte per element.
pub const MAX_UNBACKED_COUNT: usize = 1 << 16;

/// Deserializer over a borrowed buffer.
///
/// The decoder is driven entirely by the target type; there are no embedded
/// tags to fall back on, so `deserialize_any` is rejected.
pub struct Deserializer<'de> {
    input: &'de [u8],
}

impl<'de> Deserializer<'de> {
    #[must_use]
    pub const fn from_slice(input: &'de [u8]) -> Self {
        Self { input }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> &'de [u8] {
        self.input
    }

    fn take(&mut self, len: usize) -> Result<&'de [u8]> {
        if len > self.input.len() {
            return Err(Error::UnexpectedEof);
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    fn take_byte(&mut self) -> Result<u8> {
        let (&byte, tail) = self.input.split_first().ok_or(Error::UnexpectedEof)?;
        self.input = tail;
        Ok(byte)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_varint(&mut self, bits: u32) -> Result<u128> {
        let (value, used) = varint::decode(self.input, bits)?;
        self.input = &self.input[used..];
        Ok(value)
    }

    fn take_u64(&mut self) -> Result<u64> {
        let value = self.take_varint(64)?;
        u64::try_from(value).map_err(|_| Error::VarintOverflow { bits: 64 })
    }

    fn take_i64(&mut self) -> Result<i64> {
        Ok(varint::zigzag_decode(self.take_u64()?))
    }

    fn take_len(&mut self) -> Result<usize> {
        let len = self.take_u64()?;
        usize::try_from(len).map_err(|_| Error::LengthOutOfRange(len))
    }

    /// Element count of a sequence or map. Counts beyond the remaining input
    /// are only valid for zero-sized elements and are capped at
    /// [`MAX_UNBACKED_COUNT`].
    fn take_count(&mut self) -> Result<usize> {
        let len = self.take_len()?;
        if len > self.input.len() && len > MAX_UNBACKED_COUNT {
            return Err(Error::LengthOutOfRange(len as u64));
        }
        Ok(len)
    }

    fn take_bytes(&mut self) -> Result<&'de [u8]> {
        let len = self.take_len()?;
        if len > self.input.len() {
            return Err(Error::LengthOutOfRange(len as u64));
        }
        self.take(len)
    }

    fn take_str(&mut self) -> Result<&'de str> {
        std::str::from_utf8(self.take_bytes()?).map_err(|_| Error::InvalidUtf8)
    }
}

impl<'de> de::Deserializer<'de> for &mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::UnsupportedType("self-describing value"))
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_bool(self.take_byte()? != 0)
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i8(i8::from_le_bytes([self.take_byte()?]))
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let raw = self.take_varint(16)?;
        let value = varint::zigzag_decode(raw as u64);
        visitor.visit_i16(i16::try_from(value).map_err(|_| Error::VarintOverflow { bits: 16 })?)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let raw = self.take_varint(32)?;
        let value = varint::zigzag_decode(raw as u64);
        visitor.visit_i32(i32::try_from(value).map_err(|_| Error::VarintOverflow { bits: 32 })?)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i64(self.take_i64()?)
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let raw = self.take_varint(128)?;
        visitor.visit_i128(varint::zigzag_decode_128(raw))
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u8(self.take_byte()?)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let raw = self.take_varint(16)?;
        visitor.visit_u16(u16::try_from(raw).map_err(|_| Error::VarintOverflow { bits: 16 })?)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let raw = self.take_varint(32)?;
        visitor.visit_u32(u32::try_from(raw).map_err(|_| Error::VarintOverflow { bits: 32 })?)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u64(self.take_u64()?)
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u128(self.take_varint(128)?)
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f32(f32::from_le_bytes(self.take_array()?))
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f64(f64::from_le_bytes(self.take_array()?))
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let s = self.take_str()?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(Error::InvalidChar),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_borrowed_str(self.take_str()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_borrowed_bytes(self.take_bytes()?)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.take_byte()? == 0 {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let len = self.take_count()?;
        visitor.visit_seq(Counted { de: self, len })
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(Counted { de: self, len })
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_seq(Counted { de: self, len })
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let len = self.take_count()?;
        visitor.visit_map(Counted { de: self, len })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_seq(Counted {
            de: self,
            len: fields.len(),
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let tag = self.take_byte()?;
        if usize::from(tag) >= variants.len() {
            return Err(Error::InvalidDiscriminant(u64::from(tag)));
        }
        visitor.visit_enum(Variant { de: self, tag })
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::UnsupportedType("identifier"))
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::UnsupportedType("ignored value"))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

struct Counted<'a, 'de> {
    de: &'a mut Deserializer<'de>,
    len: usize,
}

impl<'de> de::SeqAccess<'de> for Counted<'_, 'de> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if self.len == 0 {
            return Ok(None);
        }
        self.len -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.len.min(self.de.input.len()))
    }
}

impl<'de> de::MapAccess<'de> for Counted<'_, 'de> {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if self.len == 0 {
            return Ok(None);
        }
        self.len -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.len.min(self.de.input.len()))
    }
}

struct Variant<'a, 'de> {
    de: &'a mut Deserializer<'de>,
    tag: u8,
}

impl<'a, 'de> de::EnumAccess<'de> for Variant<'a, 'de> {
    type Error = Error;
    type Variant = &'a mut Deserializer<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self::Variant)> {
        let index: de::value::U32Deserializer<Error> = u32::from(self.tag).into_deserializer();
        let value = seed.deserialize(index)?;
        Ok((value, self.de))
    }
}

impl<'de> de::VariantAccess<'de> for &mut Deserializer<'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(Counted { de: self, len })
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_seq(Counted {
            de: self,
            len: fields.len(),
        })
    }
}
