mod lifecycle;
mod mock_channel;
