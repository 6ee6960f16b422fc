//! Lock-free SPSC ring buffer between the audio callback and the reader.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and
//! allocation-free — safe to call from the real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the reader (producer task of the transcriber).
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Default maximum recording length the ring must absorb without the
/// consumer draining it: ten minutes.
pub const DEFAULT_MAX_DURATION_SECS: u32 = 600;

/// Ring capacity for a device sample rate: `max_duration_secs` worth of
/// samples. Long final inferences can stall the reader; the ring must
/// survive them without dropping audio.
pub fn ring_capacity(device_sample_rate: u32, max_duration_secs: u32) -> usize {
    (device_sample_rate as usize) * (max_duration_secs as usize)
}

/// Create a matched producer/consumer pair sized for `device_sample_rate`.
pub fn create_audio_ring(device_sample_rate: u32, max_duration_secs: u32) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(ring_capacity(device_sample_rate, max_duration_secs)).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_covers_ten_minutes_at_device_rate() {
        assert_eq!(ring_capacity(48_000, 600), 28_800_000);
        assert_eq!(ring_capacity(16_000, DEFAULT_MAX_DURATION_SECS), 9_600_000);
    }

    #[test]
    fn ring_round_trips_samples_in_order() {
        let (mut producer, mut consumer) = create_audio_ring(16_000, 1);
        let written = producer.push_slice(&[0.1, 0.2, 0.3]);
        assert_eq!(written, 3);

        let mut out = [0f32; 8];
        let read = consumer.pop_slice(&mut out);
        assert_eq!(read, 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn full_ring_drops_newest() {
        let (mut producer, _consumer) = {
            let rb = HeapRb::<f32>::new(4);
            rb.split()
        };
        assert_eq!(producer.push_slice(&[1.0; 4]), 4);
        // Ring full: push_slice reports zero written, nothing overwritten.
        assert_eq!(producer.push_slice(&[2.0; 2]), 0);
    }
}
