use crate::error::Result;
use crate::objects::Dictionary;

/// Stream body as stored in the file (still filter-encoded, already
/// decrypted). The stream dictionary lives in the owning object's value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stream {
    data: Vec<u8>,
}

impl Stream {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Apply the filters named in `dict` and return the decoded bytes
    pub fn decode(&self, dict: &Dictionary) -> Result<Vec<u8>> {
        crate::parser::filters::decode_stream(&self.data, dict)
    }

    /// Replace the body with its Flate-compressed form and record the
    /// filter in `dict`.
    #[cfg(feature = "compression")]
    pub fn compress_flate(&mut self, dict: &mut Dictionary) -> Result<()> {
        self.data = crate::parser::filters::encode_flate(&self.data)?;
        dict.set("Filter", crate::objects::Object::name("FlateDecode"));
        dict.set("Length", self.data.len() as i64);
        Ok(())
    }
}
