use gdal::raster::Buffer;

/// Raster block tagged with its pixel type
#[derive(Debug)]
pub enum TypedBuffer {
    F32(Buffer<f32>),
    I16(Buffer<i16>),
}

impl TypedBuffer {
    /// (width, height) of the block
    pub fn shape(&self) -> (usize, usize) {
        match self {
            TypedBuffer::F32(buffer) => buffer.shape(),
            TypedBuffer::I16(buffer) => buffer.shape(),
        }
    }

    pub fn len(&self) -> usize {
        let (w, h) = self.shape();
        w * h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&Buffer<f32>> {
        match self {
            TypedBuffer::F32(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut Buffer<f32>> {
        match self {
            TypedBuffer::F32(buffer) => Some(buffer),
            _ => None,
        }
    }
}
